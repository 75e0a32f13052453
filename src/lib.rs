//! Trendwatch: multi-user feed monitoring with offline licensing.
//!
//! Each user binds a root account, and a monitoring run fans out across the
//! root's follow-list with bounded concurrency, persisting recent items into
//! a per-user SQLite database. The store keeps an append-only engagement
//! time series so every item carries a trailing-hour like gain, which drives
//! the trending ordering.
//!
//! Access is gated offline: a 24-hour trial starts on first touch, and
//! ECDSA-signed license tokens extend it without any network call.
//!
//! [`service::MonitorService`] is the public entry point; everything under
//! it (registry, scheduler, store, verifier) is injectable for testing.

pub mod config;
pub mod error;
pub mod fetch;
pub mod license;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

pub use error::MonitorError;
pub use service::MonitorService;
