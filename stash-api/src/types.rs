//! Response shapes handed to a serving layer.

use serde::{Deserialize, Serialize};
use stash_core::{FeedEntry, MetaData};

/// One registered function, as listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub content_type: String,
    /// Source text the identifier was derived from.
    pub code: String,
    /// Path of the function detail.
    pub url: String,
    /// Path of the function's feed.
    pub feed_url: String,
}

/// One function with a page of its keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDetail {
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub feed_url: String,
    pub keys: Vec<String>,
}

/// Raw stored bytes of one result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub content_length: u64,
}

/// A feed entry with both halves rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub timestamp: String,
    pub key: String,
}

impl From<FeedEntry> for FeedItem {
    fn from(entry: FeedEntry) -> Self {
        Self {
            timestamp: entry.timestamp_str(),
            key: entry.key.to_string(),
        }
    }
}

/// A function and its most recent result, for overview pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardEntry {
    pub function: FunctionSummary,
    pub latest: Option<MetaData>,
}
