//! Per-user SQLite persistence for tracked accounts, items, and engagement
//! snapshots.
//!
//! Each user owns one database file at `<data_dir>/users/<user_id>/monitor.db`.
//! The store is an explicit capability: either `Available` (wrapping the
//! connection behind a mutex, since SQLite allows a single writer) or
//! `Unavailable` when no writable backend exists. In the degraded state every
//! write is a silent no-op and every read returns empty, so a broken disk can
//! never take a user's scheduler down.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::types::{FeedItem, FollowEntry, MonitorRow, TrackedAccount};

/// Errors specific to store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create store directory: {0}")]
    CreateDir(std::io::Error),
}

/// Fixed-width UTC timestamp; lexicographic order matches chronological.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Raw connection wrapper. Held behind a `parking_lot::Mutex` inside
/// [`UserStore`] so concurrent per-account tasks serialize their writes.
pub struct MonitorDb {
    conn: Connection,
}

impl MonitorDb {
    /// Open (or create) a database at an explicit path and apply the schema.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets reads proceed while a write is in flight.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    /// Upsert a tracked account observed in a follow-list. Last write wins.
    pub fn save_account(&self, entry: &FollowEntry, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO tracked_accounts (account_id, nickname, follower_count, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id) DO UPDATE SET
                nickname = excluded.nickname,
                follower_count = excluded.follower_count,
                last_updated = excluded.last_updated",
            params![entry.account_id, entry.nickname, entry.follower_count, fmt_ts(now)],
        )?;
        Ok(())
    }

    /// Persist a batch of fetched items for one account, recording an
    /// engagement snapshot and recomputing the hourly-gain for each.
    ///
    /// The gain is the growth since the oldest snapshot still inside the
    /// trailing one-hour window, or 0 when the item was first observed within
    /// the window. Immutable fields (description, create_time, owning
    /// account) are written once; only engagement counters, the gain, and
    /// collected_at move on re-persist.
    pub fn save_items(
        &self,
        account_id: &str,
        items: &[FeedItem],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let recorded_at = fmt_ts(now);
        let window_start = fmt_ts(now - Duration::hours(1));

        for item in items {
            // Append-only snapshot; a second pass within the same timestamp
            // resolution collides on the primary key and is ignored.
            self.conn.execute(
                "INSERT OR IGNORE INTO like_history (item_id, like_count, recorded_at)
                 VALUES (?1, ?2, ?3)",
                params![item.item_id, item.like_count, recorded_at],
            )?;

            let baseline: Option<i64> = self
                .conn
                .query_row(
                    "SELECT like_count FROM like_history
                     WHERE item_id = ?1 AND recorded_at >= ?2
                     ORDER BY recorded_at ASC LIMIT 1",
                    params![item.item_id, window_start],
                    |row| row.get(0),
                )
                .optional()?;
            let hourly_likes = baseline.map(|b| item.like_count - b).unwrap_or(0);

            self.conn.execute(
                "INSERT INTO items (
                    item_id, account_id, description, create_time,
                    like_count, collect_count, comment_count, share_count,
                    cover_url, media_url, collected_at, hourly_likes
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(item_id) DO UPDATE SET
                    like_count = excluded.like_count,
                    collect_count = excluded.collect_count,
                    comment_count = excluded.comment_count,
                    share_count = excluded.share_count,
                    hourly_likes = excluded.hourly_likes,
                    collected_at = excluded.collected_at",
                params![
                    item.item_id,
                    account_id,
                    item.description,
                    item.created_at,
                    item.like_count,
                    item.collect_count,
                    item.comment_count,
                    item.share_count,
                    item.cover_url,
                    item.media_url,
                    recorded_at,
                    hourly_likes,
                ],
            )?;
        }

        Ok(items.len())
    }

    /// Items joined with their owning account, trending first.
    pub fn get_monitoring_data(&self, limit: usize) -> Result<Vec<MonitorRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.item_id, i.account_id, i.description, i.create_time,
                    i.like_count, i.collect_count, i.comment_count, i.share_count,
                    i.cover_url, i.media_url, i.hourly_likes,
                    a.nickname, a.follower_count
             FROM items i
             JOIN tracked_accounts a ON i.account_id = a.account_id
             ORDER BY i.hourly_likes DESC, i.like_count DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(MonitorRow {
                item_id: row.get(0)?,
                account_id: row.get(1)?,
                description: row.get(2)?,
                created_at: row.get(3)?,
                total_likes: row.get(4)?,
                collect_count: row.get(5)?,
                comment_count: row.get(6)?,
                share_count: row.get(7)?,
                cover_url: row.get(8)?,
                media_url: row.get(9)?,
                hourly_likes: row.get(10)?,
                account_name: row.get(11)?,
                follower_count: row.get(12)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Count of accounts still flagged for monitoring.
    pub fn following_count(&self) -> Result<i64, StoreError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM tracked_accounts WHERE is_monitoring = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Toggle an account's monitoring flag (the soft-delete path; rows are
    /// never hard-deleted by normal operation).
    pub fn set_monitoring_enabled(&self, account_id: &str, enabled: bool) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE tracked_accounts SET is_monitoring = ?1 WHERE account_id = ?2",
            params![enabled as i64, account_id],
        )?;
        Ok(())
    }

    /// Most recent collection timestamp across all items, if any.
    pub fn last_collected_at(&self) -> Result<Option<String>, StoreError> {
        let result: Option<String> = self
            .conn
            .query_row("SELECT MAX(collected_at) FROM items", [], |row| row.get(0))?;
        Ok(result)
    }

    /// Fetch a tracked account row.
    pub fn get_account(&self, account_id: &str) -> Result<Option<TrackedAccount>, StoreError> {
        let account = self
            .conn
            .query_row(
                "SELECT account_id, nickname, follower_count, is_monitoring, last_updated
                 FROM tracked_accounts WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(TrackedAccount {
                        account_id: row.get(0)?,
                        nickname: row.get(1)?,
                        follower_count: row.get(2)?,
                        is_monitoring: row.get::<_, i64>(3)? != 0,
                        last_updated: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }
}

/// Tagged store capability, decided at construction.
pub enum UserStore {
    Available(Mutex<MonitorDb>),
    /// No writable backend. Writes no-op, reads return empty.
    Unavailable,
}

impl UserStore {
    /// Open the store for one user under a data directory. Never fails:
    /// an unopenable backend degrades to [`UserStore::Unavailable`].
    pub fn open_in(data_dir: &Path, user_id: &str) -> Self {
        let path = Self::db_path(data_dir, user_id);
        match MonitorDb::open_at(&path) {
            Ok(db) => UserStore::Available(Mutex::new(db)),
            Err(e) => {
                log::warn!(
                    "Store unavailable for user {} ({}): running degraded",
                    user_id,
                    e
                );
                UserStore::Unavailable
            }
        }
    }

    /// Open at an explicit database path. Used by tests.
    pub fn open_at(path: &Path) -> Self {
        match MonitorDb::open_at(path) {
            Ok(db) => UserStore::Available(Mutex::new(db)),
            Err(e) => {
                log::warn!("Store unavailable at {} ({})", path.display(), e);
                UserStore::Unavailable
            }
        }
    }

    fn db_path(data_dir: &Path, user_id: &str) -> PathBuf {
        data_dir.join("users").join(user_id).join("monitor.db")
    }

    pub fn is_available(&self) -> bool {
        matches!(self, UserStore::Available(_))
    }

    /// Upsert a tracked account. No-op when degraded.
    pub fn save_account(&self, entry: &FollowEntry) -> Result<(), StoreError> {
        match self {
            UserStore::Available(db) => db.lock().save_account(entry, Utc::now()),
            UserStore::Unavailable => Ok(()),
        }
    }

    /// Persist items for an account at the current wall-clock time.
    pub fn save_items(&self, account_id: &str, items: &[FeedItem]) -> Result<usize, StoreError> {
        self.save_items_at(account_id, items, Utc::now())
    }

    /// Persist items with an explicit observation time.
    pub fn save_items_at(
        &self,
        account_id: &str,
        items: &[FeedItem],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        match self {
            UserStore::Available(db) => db.lock().save_items(account_id, items, now),
            UserStore::Unavailable => Ok(0),
        }
    }

    /// Trending rows, capped at `limit`. Empty when degraded or on any
    /// read failure; a data read never raises to the caller.
    pub fn get_monitoring_data(&self, limit: usize) -> Vec<MonitorRow> {
        match self {
            UserStore::Available(db) => match db.lock().get_monitoring_data(limit) {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("Failed to read monitoring data: {}", e);
                    Vec::new()
                }
            },
            UserStore::Unavailable => Vec::new(),
        }
    }

    pub fn following_count(&self) -> i64 {
        match self {
            UserStore::Available(db) => db.lock().following_count().unwrap_or(0),
            UserStore::Unavailable => 0,
        }
    }

    pub fn last_collected_at(&self) -> Option<String> {
        match self {
            UserStore::Available(db) => db.lock().last_collected_at().unwrap_or(None),
            UserStore::Unavailable => None,
        }
    }

    /// Toggle an account's monitoring flag. No-op when degraded.
    pub fn set_monitoring_enabled(&self, account_id: &str, enabled: bool) -> Result<(), StoreError> {
        match self {
            UserStore::Available(db) => db.lock().set_monitoring_enabled(account_id, enabled),
            UserStore::Unavailable => Ok(()),
        }
    }

    /// Fetch a tracked account row. None when degraded.
    pub fn get_account(&self, account_id: &str) -> Option<TrackedAccount> {
        match self {
            UserStore::Available(db) => db.lock().get_account(account_id).unwrap_or(None),
            UserStore::Unavailable => None,
        }
    }
}
