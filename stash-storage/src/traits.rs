//! Storage traits shared by every tier.
//!
//! Every tier is a [`Collection`]: a byte-keyed store with prefix scans.
//! Tiers that also keep an append-only write log implement [`FeedStore`].
//! All calls block; a tier that talks to the network drives its own runtime.

use stash_core::{FeedEntry, StashResult, StoredRecord};
use url::Url;

use crate::embedded::EmbeddedStore;

/// Lazy ordered sequence of keys.
pub type KeyIter = Box<dyn Iterator<Item = StashResult<Vec<u8>>> + Send>;

/// Lazy ordered sequence of feed entries.
pub type FeedIter = Box<dyn Iterator<Item = StashResult<FeedEntry>> + Send>;

/// Byte-keyed key-value store.
///
/// Missing keys surface as `StorageError::NotFound` so callers can match on
/// absence instead of inspecting an `Option` at every layer.
pub trait Collection: Send + Sync {
    /// Short human-readable description, for logs.
    fn describe(&self) -> String;

    fn get(&self, key: &[u8]) -> StashResult<Vec<u8>>;

    /// Value and stored content type, read together.
    fn get_record(&self, key: &[u8]) -> StashResult<StoredRecord>;

    /// Store `value` under `key`, replacing any previous value wholesale.
    ///
    /// `content_type` of `None` records that the type is unknown (read-through
    /// backfills) rather than keeping a stale tag.
    fn put(&self, key: &[u8], value: &[u8], content_type: Option<&str>) -> StashResult<()>;

    fn contains(&self, key: &[u8]) -> StashResult<bool>;

    /// Remove `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> StashResult<()>;

    fn content_length(&self, key: &[u8]) -> StashResult<u64>;

    /// Stored content type, `None` when the writer did not record one.
    fn content_type(&self, key: &[u8]) -> StashResult<Option<String>>;

    /// Keys from `start` in key order, ending at the first key that does not
    /// start with `prefix`.
    fn iter_prefix(&self, start: &[u8], prefix: &[u8]) -> StashResult<KeyIter>;

    /// Publicly reachable address of `key`, or `Unsupported`.
    fn public_uri(&self, key: &[u8]) -> StashResult<Url>;
}

/// A collection with an append-only feed and a persisted consumer offset.
pub trait FeedStore: Collection {
    /// Reserved separator between identifier and the rest of a key.
    fn delimiter(&self) -> char;

    /// Feed entries for `identifier`, strictly after `offset` when given.
    ///
    /// `offset` must be a feed key of the same identifier.
    fn feed(&self, identifier: &str, offset: Option<&[u8]>) -> StashResult<FeedIter>;

    /// The most recent feed entry for `identifier`.
    fn latest(&self, identifier: &str) -> StashResult<Option<FeedEntry>>;

    /// This partition's persisted offset.
    fn offset(&self) -> StashResult<Option<Vec<u8>>>;

    /// Move this partition's offset forward to `offset`. Returns `false` when
    /// the stored offset is already at or past it.
    fn advance_offset(&self, offset: &[u8]) -> StashResult<bool>;

    /// A separate partition of the same local environment, with its own
    /// offset and no feed.
    fn index_storage(&self, name: &str) -> StashResult<EmbeddedStore>;
}
