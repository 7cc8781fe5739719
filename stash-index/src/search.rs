//! Type-erased search surface, for catalogs.

use serde_json::Value;
use stash_core::StashResult;

use crate::engine::IndexEngine;

pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Identifier of the orchestrator this index reads from.
    fn source_identifier(&self) -> &str;

    fn search(&self, query: &str) -> StashResult<Vec<Value>>;

    fn catch_up(&self) -> StashResult<usize>;
}

impl<V: 'static> SearchIndex for IndexEngine<V> {
    fn name(&self) -> &str {
        IndexEngine::name(self)
    }

    fn source_identifier(&self) -> &str {
        self.source().identifier()
    }

    fn search(&self, query: &str) -> StashResult<Vec<Value>> {
        IndexEngine::search(self, query)
    }

    fn catch_up(&self) -> StashResult<usize> {
        self.index()
    }
}
