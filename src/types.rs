//! Shared data types for monitoring, storage, and entitlement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry from a root account's follow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEntry {
    pub account_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub follower_count: i64,
}

/// A single fetched content item, as returned by the fetch capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub item_id: String,
    #[serde(default)]
    pub description: String,
    /// Creation time as epoch seconds.
    pub created_at: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub collect_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub share_count: i64,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub media_url: String,
}

/// A tracked account row as stored per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedAccount {
    pub account_id: String,
    pub nickname: String,
    pub follower_count: i64,
    pub is_monitoring: bool,
    pub last_updated: String,
}

/// A monitoring data row: item joined with its owning account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRow {
    pub item_id: String,
    pub account_id: String,
    pub description: String,
    pub created_at: i64,
    pub total_likes: i64,
    pub collect_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub cover_url: String,
    pub media_url: String,
    pub hourly_likes: i64,
    pub account_name: String,
    pub follower_count: i64,
}

/// Snapshot of a scheduler's run state, as reported to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub user_id: String,
    pub is_running: bool,
    pub last_update: String,
    pub following_count: i64,
}

/// Outcome of a single completed monitoring run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Accounts seen in the follow-list.
    pub accounts_total: usize,
    /// Per-account fetch tasks that failed (absorbed, not fatal).
    pub accounts_failed: usize,
    /// Items persisted across all accounts.
    pub items_persisted: usize,
    /// Whether the run's global timeout elapsed before every task finished.
    pub timed_out: bool,
}

/// Current monitoring status for a user (the `get-status` operation).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub user_id: String,
    pub root_account_id: Option<String>,
    pub monitoring: bool,
    pub last_update: String,
    pub accounts_count: i64,
}

/// Entitlement status for a user (the `get-license-status` operation).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub user_id: String,
    pub is_trial_active: bool,
    pub is_license_valid: bool,
    pub has_valid_access: bool,
    /// Days of access remaining, clamped at zero.
    pub remaining_days: i64,
}

/// Parsed, signature-verified license payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseClaims {
    pub plan: String,
    pub expiry: DateTime<Utc>,
    pub serial: String,
    pub issued_at: Option<DateTime<Utc>>,
}

/// Result of a successful license activation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseActivation {
    pub plan: String,
    pub expiry: DateTime<Utc>,
    pub serial: String,
    /// Days until expiry, computed from now and clamped at zero.
    pub remaining_days: i64,
}
