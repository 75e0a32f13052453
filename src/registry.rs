//! User-to-scheduler registry.
//!
//! Maps user identifiers to their live scheduler instances. Schedulers are
//! created lazily on first use and removed on stop, so a stopped user's next
//! start gets a fresh instance with clean run state.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::UserConfigStore;
use crate::fetch::FeedFetcher;
use crate::scheduler::MonitorScheduler;
use crate::store::UserStore;
use crate::types::RunState;

/// Holds one scheduler per active user.
pub struct MonitorRegistry {
    fetcher: Arc<dyn FeedFetcher>,
    data_dir: PathBuf,
    tasks: DashMap<String, Arc<MonitorScheduler>>,
}

impl MonitorRegistry {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, data_dir: PathBuf) -> Self {
        Self {
            fetcher,
            data_dir,
            tasks: DashMap::new(),
        }
    }

    /// The scheduler for a user, created on first reference. Opening the
    /// user's store never fails; an unopenable database yields a scheduler
    /// over a degraded store.
    pub fn scheduler_for(&self, user_id: &str) -> Arc<MonitorScheduler> {
        self.tasks
            .entry(user_id.to_string())
            .or_insert_with(|| {
                log::info!("creating monitor scheduler for user {}", user_id);
                let store = Arc::new(UserStore::open_in(&self.data_dir, user_id));
                let config_store = UserConfigStore::new(self.data_dir.clone());
                Arc::new(MonitorScheduler::new(user_id, config_store, store, self.fetcher.clone()))
            })
            .clone()
    }

    /// Signal a user's scheduler to stop and drop it from the registry.
    /// Unknown users are a no-op.
    pub fn stop(&self, user_id: &str) {
        if let Some((_, scheduler)) = self.tasks.remove(user_id) {
            scheduler.stop();
        }
    }

    /// Run state for a user without instantiating a scheduler: an unknown
    /// user is simply idle.
    pub fn state_for(&self, user_id: &str) -> Option<RunState> {
        self.tasks.get(user_id).map(|entry| entry.get_state())
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        self.tasks
            .get(user_id)
            .map(|entry| entry.is_running())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::fetch::FetchError;
    use crate::types::{FeedItem, FollowEntry};

    struct NullFetcher;

    #[async_trait]
    impl FeedFetcher for NullFetcher {
        async fn fetch_following(
            &self,
            _root_account: &str,
            _credential: &str,
        ) -> Result<Vec<FollowEntry>, FetchError> {
            Ok(vec![])
        }

        async fn fetch_recent_items(
            &self,
            _account: &str,
            _limit: usize,
            _credential: &str,
        ) -> Result<Vec<FeedItem>, FetchError> {
            Ok(vec![])
        }
    }

    fn test_registry() -> (tempfile::TempDir, MonitorRegistry) {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = MonitorRegistry::new(Arc::new(NullFetcher), dir.path().to_path_buf());
        (dir, registry)
    }

    #[test]
    fn test_scheduler_is_reused_per_user() {
        let (_dir, registry) = test_registry();
        let first = registry.scheduler_for("u1");
        let second = registry.scheduler_for("u1");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_users_get_distinct_schedulers() {
        let (_dir, registry) = test_registry();
        let a = registry.scheduler_for("u1");
        let b = registry.scheduler_for("u2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_stop_removes_entry() {
        let (_dir, registry) = test_registry();
        let first = registry.scheduler_for("u1");
        registry.stop("u1");
        assert!(registry.state_for("u1").is_none());

        let fresh = registry.scheduler_for("u1");
        assert!(!Arc::ptr_eq(&first, &fresh));
    }

    #[test]
    fn test_unknown_user_is_idle() {
        let (_dir, registry) = test_registry();
        assert!(registry.state_for("ghost").is_none());
        assert!(!registry.is_running("ghost"));
    }

    #[test]
    fn test_stop_unknown_user_is_noop() {
        let (_dir, registry) = test_registry();
        registry.stop("ghost");
        assert!(registry.state_for("ghost").is_none());
    }
}
