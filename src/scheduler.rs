//! Per-user fetch orchestrator.
//!
//! One run fans a user's follow-list out into bounded-concurrency
//! per-account fetches, persists results through the user's store, and
//! tolerates partial failure: a single account's fetch failing never fails
//! the run or its siblings. The run state machine is Idle -> Running -> Idle,
//! with the Running flag cleared unconditionally whether the run succeeded,
//! partially failed, or timed out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::UserConfigStore;
use crate::error::MonitorError;
use crate::fetch::FeedFetcher;
use crate::store::UserStore;
use crate::types::{FeedItem, FollowEntry, MonitorRow, RunState, RunSummary};

/// Default concurrent per-account fetches within one run. The pool is
/// private to the run, not shared across users.
const MAX_CONCURRENT_FETCHES: usize = 5;

/// Most recent items requested per followed account.
const ITEMS_PER_ACCOUNT: usize = 10;

/// Only items created within this window are persisted.
const RECENCY_WINDOW_DAYS: i64 = 3;

/// Default global bound on one run's fan-out. Tasks still outstanding when
/// this elapses are abandoned and their results discarded.
const RUN_TIMEOUT_SECS: u64 = 600;

/// Orchestrates monitoring runs for a single user.
pub struct MonitorScheduler {
    user_id: String,
    config_store: UserConfigStore,
    store: Arc<UserStore>,
    fetcher: Arc<dyn FeedFetcher>,
    max_concurrent_fetches: usize,
    run_timeout: StdDuration,
    running: AtomicBool,
    stop_requested: AtomicBool,
    last_update: Mutex<DateTime<Utc>>,
}

impl MonitorScheduler {
    pub fn new(
        user_id: &str,
        config_store: UserConfigStore,
        store: Arc<UserStore>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        Self::with_limits(
            user_id,
            config_store,
            store,
            fetcher,
            MAX_CONCURRENT_FETCHES,
            StdDuration::from_secs(RUN_TIMEOUT_SECS),
        )
    }

    /// Scheduler with explicit concurrency and timeout limits. Tests inject
    /// small values here; production callers use [`MonitorScheduler::new`].
    pub fn with_limits(
        user_id: &str,
        config_store: UserConfigStore,
        store: Arc<UserStore>,
        fetcher: Arc<dyn FeedFetcher>,
        max_concurrent_fetches: usize,
        run_timeout: StdDuration,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            config_store,
            store,
            fetcher,
            max_concurrent_fetches,
            run_timeout,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            last_update: Mutex::new(Utc::now()),
        }
    }

    /// Execute one monitoring run.
    ///
    /// Reloads the user config so a root account bound after this scheduler
    /// was created is picked up. A missing root account fails fast without
    /// ever leaving Idle.
    pub async fn run_monitoring_task(&self, credential: &str) -> Result<RunSummary, MonitorError> {
        let config = self.config_store.load(&self.user_id);
        let root_account = config
            .root_account_id
            .filter(|id| !id.is_empty())
            .ok_or(MonitorError::MissingRootAccount)?;

        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let result = self.monitor_following(&root_account, credential).await;

        // Back to Idle no matter how the run ended.
        self.running.store(false, Ordering::SeqCst);
        match &result {
            Ok(summary) => {
                *self.last_update.lock() = Utc::now();
                log::info!(
                    "[{}] run complete: {}/{} accounts, {} items persisted{}",
                    self.user_id,
                    summary.accounts_total - summary.accounts_failed,
                    summary.accounts_total,
                    summary.items_persisted,
                    if summary.timed_out { " (timed out)" } else { "" }
                );
            }
            Err(e) => {
                log::error!("[{}] monitoring run failed: {}", self.user_id, e);
            }
        }
        result
    }

    async fn monitor_following(
        &self,
        root_account: &str,
        credential: &str,
    ) -> Result<RunSummary, MonitorError> {
        let following = self
            .fetcher
            .fetch_following(root_account, credential)
            .await
            .map_err(MonitorError::FollowListFetch)?;
        log::info!("[{}] follow-list has {} accounts", self.user_id, following.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let mut tasks: JoinSet<(String, Option<usize>)> = JoinSet::new();
        let mut summary = RunSummary::default();

        for entry in following {
            if entry.account_id.is_empty() {
                continue;
            }
            summary.accounts_total += 1;

            // Account metadata is independent of fetching its items: a
            // persist failure here is logged, never fatal to the run.
            if let Err(e) = self.store.save_account(&entry) {
                log::warn!(
                    "[{}] failed to save account {}: {}",
                    self.user_id,
                    entry.account_id,
                    e
                );
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                log::info!("[{}] stop requested, halting dispatch", self.user_id);
                break;
            }

            let fetcher = Arc::clone(&self.fetcher);
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let credential = credential.to_string();
            let user_id = self.user_id.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (entry.account_id, None),
                };
                fetch_account_items(fetcher, store, entry, &credential, &user_id).await
            });
        }

        let deadline = tokio::time::Instant::now() + self.run_timeout;
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                log::info!("[{}] stop requested, abandoning in-flight tasks", self.user_id);
                tasks.abort_all();
                break;
            }
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((account_id, outcome)))) => match outcome {
                    Some(count) => {
                        summary.items_persisted += count;
                        if count > 0 {
                            log::info!(
                                "[{}] account {}: {} items persisted",
                                self.user_id,
                                account_id,
                                count
                            );
                        }
                    }
                    None => summary.accounts_failed += 1,
                },
                Ok(Some(Err(e))) => {
                    log::error!("[{}] fetch task aborted: {}", self.user_id, e);
                    summary.accounts_failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "[{}] run timeout after {}s, abandoning outstanding tasks",
                        self.user_id,
                        self.run_timeout.as_secs()
                    );
                    summary.timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Signal the current run to stop. Cooperative: checked between task
    /// dispatches and joins; in-flight tasks are not waited on.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        log::info!("[{}] monitoring stopped", self.user_id);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current run state plus store-derived counters.
    pub fn get_state(&self) -> RunState {
        RunState {
            user_id: self.user_id.clone(),
            is_running: self.is_running(),
            last_update: self.last_update.lock().to_rfc3339(),
            following_count: self.store.following_count(),
        }
    }

    /// Trending rows from this user's store.
    pub fn get_monitoring_data(&self, limit: usize) -> Vec<MonitorRow> {
        self.store.get_monitoring_data(limit)
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }
}

/// Fetch one account's recent items, filter to the recency window, and
/// persist them. Failures are absorbed: a fetch error reports the account as
/// failed, a persist error is logged and reported as zero items.
async fn fetch_account_items(
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<UserStore>,
    entry: FollowEntry,
    credential: &str,
    user_id: &str,
) -> (String, Option<usize>) {
    let items = match fetcher
        .fetch_recent_items(&entry.account_id, ITEMS_PER_ACCOUNT, credential)
        .await
    {
        Ok(items) => items,
        Err(e) => {
            log::error!(
                "[{}] fetching items for {} failed: {}",
                user_id,
                entry.account_id,
                e
            );
            return (entry.account_id, None);
        }
    };

    let cutoff = (Utc::now() - Duration::days(RECENCY_WINDOW_DAYS)).timestamp();
    let recent: Vec<FeedItem> = items
        .into_iter()
        .filter(|item| item.created_at > cutoff)
        .collect();
    if recent.is_empty() {
        return (entry.account_id, Some(0));
    }

    match store.save_items(&entry.account_id, &recent) {
        Ok(count) => (entry.account_id, Some(count)),
        Err(e) => {
            log::warn!(
                "[{}] persisting items for {} failed: {}",
                user_id,
                entry.account_id,
                e
            );
            (entry.account_id, Some(0))
        }
    }
}
