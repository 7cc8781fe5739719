//! Type-erased view of an orchestrator, for catalogs that hold many value types.

use stash_core::{Key, MetaData, StashResult};
use stash_storage::FeedIter;

use crate::memo::{KeysIter, Memo};

/// Read-only operations every [`Memo`] exposes regardless of its value type.
pub trait CachedFunction: Send + Sync {
    fn identifier(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> Option<&str>;

    /// Source text the identity was derived from.
    fn source(&self) -> &str;

    fn content_type(&self) -> &str;

    fn keys(&self) -> StashResult<KeysIter>;

    fn raw(&self, key: &Key) -> StashResult<(Vec<u8>, MetaData)>;

    fn entries(&self, offset: Option<&[u8]>) -> StashResult<FeedIter>;

    fn latest_meta(&self) -> StashResult<Option<MetaData>>;
}

impl<V: 'static> CachedFunction for Memo<V> {
    fn identifier(&self) -> &str {
        Memo::identifier(self)
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn description(&self) -> Option<&str> {
        self.descriptor().description.as_deref()
    }

    fn source(&self) -> &str {
        &self.descriptor().source
    }

    fn content_type(&self) -> &str {
        Memo::content_type(self)
    }

    fn keys(&self) -> StashResult<KeysIter> {
        self.iter_keys()
    }

    fn raw(&self, key: &Key) -> StashResult<(Vec<u8>, MetaData)> {
        self.get_raw(key)
    }

    fn entries(&self, offset: Option<&[u8]>) -> StashResult<FeedIter> {
        self.feed(offset)
    }

    fn latest_meta(&self) -> StashResult<Option<MetaData>> {
        self.most_recent_meta()
    }
}
