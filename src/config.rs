//! Per-user configuration persisted as JSON.
//!
//! Each user owns one config file at `<data_dir>/users/<user_id>/config.json`,
//! rewritten whole on every mutation. A missing or corrupt file loads
//! defaults so a user record always exists once referenced.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Trial window length.
pub const TRIAL_HOURS: i64 = 24;

/// Per-user configuration and entitlement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    pub user_id: String,
    /// The root account whose follow-list is monitored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl UserConfig {
    fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            root_account_id: None,
            license_key: None,
            trial_start: None,
            license_expiry: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Generate a fresh opaque user identifier.
    pub fn generate_user_id() -> String {
        uuid::Uuid::new_v4().to_string()[..8].to_string()
    }

    /// True while now is within the 24-hour trial window.
    pub fn is_trial_active(&self) -> bool {
        match self.trial_start {
            Some(start) => Utc::now() < start + Duration::hours(TRIAL_HOURS),
            None => false,
        }
    }

    /// True while a stored license expiry is in the future.
    pub fn is_license_valid(&self) -> bool {
        match self.license_expiry {
            Some(expiry) => Utc::now() < expiry,
            None => false,
        }
    }

    /// A user has access iff the trial is active or the license is valid.
    pub fn has_valid_access(&self) -> bool {
        self.is_trial_active() || self.is_license_valid()
    }
}

/// Loads and saves per-user config files under an injectable data directory.
#[derive(Debug, Clone)]
pub struct UserConfigStore {
    data_dir: PathBuf,
}

impl UserConfigStore {
    /// Config store rooted at an explicit directory. Tests use tempdirs.
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Config store rooted at the default `~/.trendwatch` directory.
    pub fn default_dir() -> Result<Self, MonitorError> {
        let home = dirs::home_dir()
            .ok_or_else(|| MonitorError::Config("home directory not found".to_string()))?;
        Ok(Self::new(home.join(".trendwatch")))
    }

    /// Root data directory this store is bound to.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Directory holding a single user's config and database.
    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.data_dir.join("users").join(user_id)
    }

    fn config_path(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("config.json")
    }

    /// Load a user's config, falling back to defaults when the file is
    /// missing or unreadable. First reference creates the record in memory;
    /// it is persisted on the first mutation.
    pub fn load(&self, user_id: &str) -> UserConfig {
        let path = self.config_path(user_id);
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<UserConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Corrupt config for user {}: {}. Using defaults.", user_id, e);
                    UserConfig::new(user_id)
                }
            },
            Err(_) => UserConfig::new(user_id),
        }
    }

    /// Rewrite the whole config file for this user.
    pub fn save(&self, config: &UserConfig) -> Result<(), MonitorError> {
        let dir = self.user_dir(&config.user_id);
        fs::create_dir_all(&dir)
            .map_err(|e| MonitorError::Config(format!("failed to create user dir: {}", e)))?;

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| MonitorError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(self.config_path(&config.user_id), content)
            .map_err(|e| MonitorError::Config(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Bind the root account whose follow-list is monitored.
    pub fn set_root_account(&self, user_id: &str, account_id: &str) -> Result<UserConfig, MonitorError> {
        let mut config = self.load(user_id);
        config.root_account_id = Some(account_id.to_string());
        config.last_updated = Utc::now();
        self.save(&config)?;
        Ok(config)
    }

    /// Persist an activated license token and its expiry.
    pub fn set_license(
        &self,
        user_id: &str,
        license_key: &str,
        expiry: DateTime<Utc>,
    ) -> Result<UserConfig, MonitorError> {
        let mut config = self.load(user_id);
        config.license_key = Some(license_key.to_string());
        config.license_expiry = Some(expiry);
        config.last_updated = Utc::now();
        self.save(&config)?;
        Ok(config)
    }

    /// Stamp the trial start. Only ever called for a user without one.
    pub fn start_trial(&self, user_id: &str) -> Result<UserConfig, MonitorError> {
        let mut config = self.load(user_id);
        if config.trial_start.is_none() {
            config.trial_start = Some(Utc::now());
            config.last_updated = Utc::now();
            self.save(&config)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, UserConfigStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = UserConfigStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn test_load_missing_returns_defaults() {
        let (_dir, store) = test_store();
        let config = store.load("alice");
        assert_eq!(config.user_id, "alice");
        assert!(config.root_account_id.is_none());
        assert!(config.trial_start.is_none());
        assert!(!config.has_valid_access());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (_dir, store) = test_store();
        store
            .set_root_account("alice", "acct-123")
            .expect("set root account");

        let config = store.load("alice");
        assert_eq!(config.root_account_id.as_deref(), Some("acct-123"));
    }

    #[test]
    fn test_corrupt_config_falls_back_to_defaults() {
        let (_dir, store) = test_store();
        let dir = store.user_dir("bob");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("config.json"), "{not json").expect("write garbage");

        let config = store.load("bob");
        assert_eq!(config.user_id, "bob");
        assert!(config.license_key.is_none());
    }

    #[test]
    fn test_start_trial_does_not_reset() {
        let (_dir, store) = test_store();
        let first = store.start_trial("carol").expect("first trial");
        let started = first.trial_start.expect("trial stamped");

        let second = store.start_trial("carol").expect("second trial");
        assert_eq!(second.trial_start, Some(started));
    }

    #[test]
    fn test_trial_window_governs_access() {
        let (_dir, store) = test_store();
        let mut config = store.load("dave");

        config.trial_start = Some(Utc::now() - Duration::hours(1));
        assert!(config.is_trial_active());
        assert!(config.has_valid_access());

        config.trial_start = Some(Utc::now() - Duration::hours(TRIAL_HOURS + 1));
        assert!(!config.is_trial_active());
        assert!(!config.has_valid_access());
    }

    #[test]
    fn test_generate_user_id_shape() {
        let id = UserConfig::generate_user_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, UserConfig::generate_user_id());
    }

    #[test]
    fn test_license_expiry_governs_access() {
        let (_dir, store) = test_store();
        let mut config = store.load("erin");

        config.license_expiry = Some(Utc::now() + Duration::days(30));
        assert!(config.is_license_valid());

        config.license_expiry = Some(Utc::now() - Duration::days(1));
        assert!(!config.is_license_valid());
    }
}
