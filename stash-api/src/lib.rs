//! Serving-side view of stash.
//!
//! [`Catalog`] collects cached functions and indexes and answers the lookups
//! a dashboard or HTTP API performs. No server is included.

pub mod catalog;
pub mod types;

pub use catalog::{Catalog, DEFAULT_KEY_LIMIT};
pub use types::{DashboardEntry, FeedItem, FunctionDetail, FunctionSummary, ResultPayload};
