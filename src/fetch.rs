//! External fetch capability.
//!
//! The network crawler is an external collaborator: given an account
//! identifier and a credential it returns follow-list entries or recent
//! items, or fails. The core only depends on this trait; tests supply mock
//! implementations.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{FeedItem, FollowEntry};

/// Errors raised by the fetch capability.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Capability to fetch a root account's follow-list and any account's
/// recent items.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the full follow-list of `root_account` (no item cap).
    async fn fetch_following(
        &self,
        root_account: &str,
        credential: &str,
    ) -> Result<Vec<FollowEntry>, FetchError>;

    /// Fetch up to `limit` of `account`'s most recent items.
    async fn fetch_recent_items(
        &self,
        account: &str,
        limit: usize,
        credential: &str,
    ) -> Result<Vec<FeedItem>, FetchError>;
}
