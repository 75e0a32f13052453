//! The public service surface.
//!
//! `MonitorService` bundles the registry, the license verifier, and the
//! config store behind the operations callers use. It is an explicit,
//! injectable object: construct one per process (or per test) and pass it
//! around rather than reaching for global state.
//!
//! Every monitoring operation is gated by `ensure_access`: a user's first
//! touch starts their trial, and once both trial and license have lapsed the
//! operation fails with `NoAccess` instead of silently degrading.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{UserConfig, UserConfigStore};
use crate::error::MonitorError;
use crate::fetch::FeedFetcher;
use crate::license::{self, LicenseVerifier};
use crate::registry::MonitorRegistry;
use crate::types::{LicenseActivation, LicenseStatus, MonitorRow, MonitorStatus, RunState};

pub struct MonitorService {
    registry: MonitorRegistry,
    verifier: LicenseVerifier,
    config_store: UserConfigStore,
}

impl MonitorService {
    /// Service over an explicit data directory and key set. Tests inject a
    /// tempdir and their own verifier here.
    pub fn new(fetcher: Arc<dyn FeedFetcher>, verifier: LicenseVerifier, data_dir: PathBuf) -> Self {
        Self {
            registry: MonitorRegistry::new(fetcher, data_dir.clone()),
            verifier,
            config_store: UserConfigStore::new(data_dir),
        }
    }

    /// Service over the default data directory and the compiled-in keys.
    pub fn with_defaults(fetcher: Arc<dyn FeedFetcher>) -> Result<Self, MonitorError> {
        let config_store = UserConfigStore::default_dir()?;
        let data_dir = config_store.data_dir().to_path_buf();
        Ok(Self {
            registry: MonitorRegistry::new(fetcher, data_dir),
            verifier: LicenseVerifier::embedded(),
            config_store,
        })
    }

    /// Gate for every monitoring operation. A user's first touch starts
    /// their 24-hour trial; afterwards access requires a live trial window
    /// or a valid license.
    fn ensure_access(&self, user_id: &str) -> Result<(), MonitorError> {
        let config = self.config_store.load(user_id);
        if config.has_valid_access() {
            return Ok(());
        }
        if license::start_or_check_trial(&self.config_store, user_id)? {
            return Ok(());
        }
        Err(MonitorError::NoAccess)
    }

    /// Current monitoring status for a user.
    pub fn get_status(&self, user_id: &str) -> Result<MonitorStatus, MonitorError> {
        self.ensure_access(user_id)?;
        let config = self.config_store.load(user_id);
        let state = self.registry.scheduler_for(user_id).get_state();
        Ok(MonitorStatus {
            user_id: user_id.to_string(),
            root_account_id: config.root_account_id,
            monitoring: state.is_running,
            last_update: state.last_update,
            accounts_count: state.following_count,
        })
    }

    /// Start a monitoring run in the background.
    ///
    /// Optionally binds the root account in the same call. The run itself is
    /// fire-and-forget; failures are logged by the scheduler and reflected in
    /// later status reads. A run already in flight is left alone.
    pub fn start_monitoring(
        &self,
        user_id: &str,
        credential: &str,
        root_account: Option<&str>,
    ) -> Result<RunState, MonitorError> {
        self.ensure_access(user_id)?;

        if let Some(account_id) = root_account.filter(|id| !id.is_empty()) {
            self.config_store.set_root_account(user_id, account_id)?;
        }
        let config = self.config_store.load(user_id);
        if config.root_account_id.as_deref().unwrap_or("").is_empty() {
            return Err(MonitorError::MissingRootAccount);
        }

        let scheduler = self.registry.scheduler_for(user_id);
        if !scheduler.is_running() {
            let task = Arc::clone(&scheduler);
            let credential = credential.to_string();
            tokio::spawn(async move {
                // Run errors are already logged by the scheduler itself.
                let _ = task.run_monitoring_task(&credential).await;
            });
        }
        Ok(scheduler.get_state())
    }

    /// Stop a user's monitoring run. Unknown or idle users are a no-op.
    pub fn stop_monitoring(&self, user_id: &str) -> Result<(), MonitorError> {
        self.ensure_access(user_id)?;
        self.registry.stop(user_id);
        Ok(())
    }

    /// Trending rows for a user, hottest first.
    pub fn get_monitoring_data(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MonitorRow>, MonitorError> {
        self.ensure_access(user_id)?;
        Ok(self.registry.scheduler_for(user_id).get_monitoring_data(limit))
    }

    /// Bind the root account whose follow-list is monitored.
    pub fn set_root_account(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<UserConfig, MonitorError> {
        self.ensure_access(user_id)?;
        if account_id.trim().is_empty() {
            return Err(MonitorError::Config(
                "root account id must not be empty".to_string(),
            ));
        }
        self.config_store.set_root_account(user_id, account_id.trim())
    }

    /// Verify and persist a license token. Not gated: activation is how a
    /// lapsed user regains access.
    pub fn activate_license(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<LicenseActivation, MonitorError> {
        license::activate(&self.verifier, &self.config_store, user_id, token)
    }

    /// Entitlement report for a user. Read-only: never starts a trial.
    pub fn get_license_status(&self, user_id: &str) -> LicenseStatus {
        let config = self.config_store.load(user_id);
        LicenseStatus {
            user_id: user_id.to_string(),
            is_trial_active: config.is_trial_active(),
            is_license_valid: config.is_license_valid(),
            has_valid_access: config.has_valid_access(),
            remaining_days: license::remaining_days(&config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use crate::fetch::FetchError;
    use crate::types::{FeedItem, FollowEntry};

    struct MockFetcher {
        following: Vec<FollowEntry>,
        items: HashMap<String, Vec<FeedItem>>,
    }

    #[async_trait]
    impl FeedFetcher for MockFetcher {
        async fn fetch_following(
            &self,
            _root_account: &str,
            _credential: &str,
        ) -> Result<Vec<FollowEntry>, FetchError> {
            Ok(self.following.clone())
        }

        async fn fetch_recent_items(
            &self,
            account: &str,
            _limit: usize,
            _credential: &str,
        ) -> Result<Vec<FeedItem>, FetchError> {
            Ok(self.items.get(account).cloned().unwrap_or_default())
        }
    }

    fn test_service() -> (tempfile::TempDir, MonitorService) {
        let mut items = HashMap::new();
        items.insert(
            "a1".to_string(),
            vec![FeedItem {
                item_id: "a1-v1".to_string(),
                description: "fresh".to_string(),
                created_at: Utc::now().timestamp() - 60,
                like_count: 12,
                collect_count: 0,
                comment_count: 0,
                share_count: 0,
                cover_url: String::new(),
                media_url: String::new(),
            }],
        );
        let fetcher = MockFetcher {
            following: vec![FollowEntry {
                account_id: "a1".to_string(),
                nickname: "creator".to_string(),
                follower_count: 500,
            }],
            items,
        };

        let dir = tempfile::tempdir().expect("temp dir");
        let service = MonitorService::new(
            Arc::new(fetcher),
            LicenseVerifier::embedded(),
            dir.path().to_path_buf(),
        );
        (dir, service)
    }

    fn expire_trial(service: &MonitorService, user_id: &str) {
        let mut config = service.config_store.load(user_id);
        config.trial_start = Some(Utc::now() - Duration::hours(48));
        service.config_store.save(&config).expect("save config");
    }

    #[tokio::test]
    async fn test_first_touch_starts_trial() {
        let (_dir, service) = test_service();

        let status = service.get_status("alice").expect("first touch allowed");
        assert!(!status.monitoring);
        assert!(status.root_account_id.is_none());

        let license = service.get_license_status("alice");
        assert!(license.is_trial_active);
        assert!(license.has_valid_access);
        assert!(license.remaining_days <= 1);
    }

    #[tokio::test]
    async fn test_lapsed_user_is_denied() {
        let (_dir, service) = test_service();
        service.get_status("bob").expect("trial starts");
        expire_trial(&service, "bob");

        let err = service.get_monitoring_data("bob", 10).unwrap_err();
        assert!(matches!(err, MonitorError::NoAccess));
        assert!(!service.get_license_status("bob").has_valid_access);
    }

    #[tokio::test]
    async fn test_start_without_root_account_fails() {
        let (_dir, service) = test_service();
        let err = service.start_monitoring("carol", "", None).unwrap_err();
        assert!(matches!(err, MonitorError::MissingRootAccount));
    }

    #[tokio::test]
    async fn test_empty_root_account_rejected() {
        let (_dir, service) = test_service();
        let err = service.set_root_account("dave", "  ").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_runs_and_collects() {
        let (_dir, service) = test_service();
        service
            .start_monitoring("erin", "session-token", Some("root-1"))
            .expect("start accepted");

        // The run is fire-and-forget; poll until the mock run lands.
        let mut rows = vec![];
        for _ in 0..100 {
            rows = service.get_monitoring_data("erin", 10).expect("data readable");
            if !rows.is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, "a1-v1");
        assert_eq!(rows[0].account_name, "creator");

        let status = service.get_status("erin").expect("status");
        assert_eq!(status.root_account_id.as_deref(), Some("root-1"));
        assert_eq!(status.accounts_count, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_dir, service) = test_service();
        service.stop_monitoring("frank").expect("stop unknown user");
        service.stop_monitoring("frank").expect("stop again");
    }

    #[tokio::test]
    async fn test_license_status_read_only() {
        let (_dir, service) = test_service();

        // Reading entitlement must not stamp a trial.
        let status = service.get_license_status("grace");
        assert!(!status.is_trial_active);
        assert!(!status.has_valid_access);
        assert_eq!(status.remaining_days, 0);
        assert!(service.config_store.load("grace").trial_start.is_none());
    }

    #[tokio::test]
    async fn test_activation_restores_access() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;
        use p256::ecdsa::signature::Signer;
        use p256::ecdsa::{Signature, SigningKey};

        let mut bytes = [0u8; 32];
        bytes[31] = 42;
        let key = SigningKey::from_slice(&bytes).expect("valid scalar");

        let mut items = HashMap::new();
        items.insert("a1".to_string(), vec![]);
        let fetcher = MockFetcher {
            following: vec![],
            items,
        };
        let dir = tempfile::tempdir().expect("temp dir");
        let service = MonitorService::new(
            Arc::new(fetcher),
            LicenseVerifier::with_keys(vec![key.verifying_key().clone()]),
            dir.path().to_path_buf(),
        );

        service.get_status("hana").expect("trial starts");
        expire_trial(&service, "hana");
        assert!(matches!(
            service.get_status("hana").unwrap_err(),
            MonitorError::NoAccess
        ));

        let data = serde_json::json!({
            "type": "professional",
            "expiry": (Utc::now() + Duration::days(90)).to_rfc3339(),
            "serial": "SERVICE000000001",
        });
        let canonical = serde_json::to_string(&data).expect("canonical");
        let signature: Signature = key.sign(canonical.as_bytes());
        let token = BASE64.encode(
            serde_json::json!({
                "data": data,
                "sig": BASE64.encode(signature.to_bytes()),
            })
            .to_string(),
        );

        let activation = service.activate_license("hana", &token).expect("activation");
        assert_eq!(activation.plan, "professional");
        assert!(activation.remaining_days >= 89);

        assert!(service.get_status("hana").is_ok());
        let license = service.get_license_status("hana");
        assert!(license.is_license_valid);
        assert!(license.has_valid_access);
    }
}
