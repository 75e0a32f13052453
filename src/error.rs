//! Service-level error taxonomy.
//!
//! Entitlement errors are surfaced to the caller verbatim (user-actionable).
//! Per-account fetch and persist failures are logged and absorbed by the
//! scheduler; only failing to start a run (missing root account, follow-list
//! fetch failure) is reported as an error. Nothing here is fatal to the
//! process.

use thiserror::Error;

use crate::fetch::FetchError;
use crate::license::LicenseError;
use crate::store::StoreError;

/// Errors surfaced by the monitoring service.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Neither an active trial nor a valid license.
    #[error("no valid access: trial expired and no active license")]
    NoAccess,

    /// The user has no bound root account, so a run cannot start.
    #[error("no root account bound for this user")]
    MissingRootAccount,

    /// The follow-list fetch failed, so the run failed to start.
    #[error("follow-list fetch failed: {0}")]
    FollowListFetch(#[source] FetchError),

    #[error(transparent)]
    License(#[from] LicenseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Returns true if the error is actionable by the end user
    /// (entitlement or setup) rather than transient.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            MonitorError::NoAccess | MonitorError::MissingRootAccount | MonitorError::License(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_actionable_classification() {
        assert!(MonitorError::NoAccess.is_user_actionable());
        assert!(MonitorError::MissingRootAccount.is_user_actionable());
        assert!(MonitorError::License(LicenseError::Expired).is_user_actionable());

        assert!(!MonitorError::FollowListFetch(FetchError::Network("connection reset".to_string()))
            .is_user_actionable());
        assert!(!MonitorError::Config("unwritable".to_string()).is_user_actionable());
    }
}
