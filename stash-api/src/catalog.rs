//! Registry of cached functions and their indexes.
//!
//! The catalog answers the lookups an HTTP layer needs without owning any
//! transport: list functions, page through keys, fetch raw results, read
//! feeds and run index searches. Unknown identifiers and index names surface
//! as [`CatalogError`]; missing keys surface as storage `NotFound`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use stash_cache::CachedFunction;
use stash_core::{CatalogError, Key, StashResult};
use stash_index::SearchIndex;
use url::Url;

use crate::types::{DashboardEntry, FeedItem, FunctionDetail, FunctionSummary, ResultPayload};

/// Keys returned by [`Catalog::get_function`] unless configured otherwise.
pub const DEFAULT_KEY_LIMIT: usize = 100;

/// Functions keyed by identifier, indexes keyed by (identifier, name).
pub struct Catalog {
    functions: BTreeMap<String, Arc<dyn CachedFunction>>,
    indexes: BTreeMap<(String, String), Arc<dyn SearchIndex>>,
    key_limit: usize,
    public_base_url: Option<Url>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
            indexes: BTreeMap::new(),
            key_limit: DEFAULT_KEY_LIMIT,
            public_base_url: None,
        }
    }

    /// Cap the number of keys in a function detail.
    pub fn with_key_limit(mut self, limit: usize) -> Self {
        self.key_limit = limit;
        self
    }

    /// Address results are served from; dashboard entries link there.
    pub fn with_public_base_url(mut self, base: Url) -> Self {
        self.public_base_url = Some(base);
        self
    }

    /// Register a function, replacing one with the same identifier.
    pub fn register_function(&mut self, function: Arc<dyn CachedFunction>) -> Option<Arc<dyn CachedFunction>> {
        let identifier = function.identifier().to_string();
        tracing::debug!(identifier = %identifier, name = %function.name(), "Registered function");
        self.functions.insert(identifier, function)
    }

    /// Register an index under its source's identifier.
    ///
    /// The source function must already be registered.
    pub fn register_index(&mut self, index: Arc<dyn SearchIndex>) -> StashResult<()> {
        let identifier = index.source_identifier().to_string();
        if !self.functions.contains_key(&identifier) {
            return Err(CatalogError::UnknownFunction { identifier }.into());
        }
        let name = index.name().to_string();
        tracing::debug!(identifier = %identifier, index = %name, "Registered index");
        self.indexes.insert((identifier, name), index);
        Ok(())
    }

    fn function(&self, identifier: &str) -> StashResult<&Arc<dyn CachedFunction>> {
        self.functions.get(identifier).ok_or_else(|| {
            CatalogError::UnknownFunction {
                identifier: identifier.to_string(),
            }
            .into()
        })
    }

    pub fn list_functions(&self) -> Vec<FunctionSummary> {
        self.functions.values().map(|f| summary(f.as_ref())).collect()
    }

    /// A function and up to the configured number of its keys.
    pub fn get_function(&self, identifier: &str) -> StashResult<FunctionDetail> {
        let function = self.function(identifier)?;
        let keys = function
            .keys()?
            .take(self.key_limit)
            .map(|key| key.map(|k| k.to_string()))
            .collect::<StashResult<Vec<_>>>()?;
        Ok(FunctionDetail {
            identifier: identifier.to_string(),
            name: function.name().to_string(),
            description: function.description().map(str::to_string),
            url: function_url(identifier),
            feed_url: feed_url(identifier),
            keys,
        })
    }

    pub fn get_result(&self, identifier: &str, key: &str) -> StashResult<ResultPayload> {
        let function = self.function(identifier)?;
        let (bytes, meta) = function.raw(&Key::from(key))?;
        Ok(ResultPayload {
            bytes,
            content_type: meta.content_type,
            content_length: meta.content_length,
        })
    }

    /// Feed entries after `offset`, a timestamp previously returned here.
    pub fn get_feed(&self, identifier: &str, offset: Option<&str>) -> StashResult<Vec<FeedItem>> {
        let function = self.function(identifier)?;
        function
            .entries(offset.map(str::as_bytes))?
            .map(|entry| entry.map(FeedItem::from))
            .collect()
    }

    pub fn search(&self, identifier: &str, index: &str, query: &str) -> StashResult<Vec<Value>> {
        self.function(identifier)?;
        let engine = self
            .indexes
            .get(&(identifier.to_string(), index.to_string()))
            .ok_or_else(|| CatalogError::UnknownIndex {
                identifier: identifier.to_string(),
                index: index.to_string(),
            })?;
        engine.search(query)
    }

    /// Bring every registered index up to date with its source.
    pub fn catch_up_indexes(&self) -> StashResult<usize> {
        let mut total = 0;
        for ((identifier, name), index) in &self.indexes {
            let indexed = index.catch_up()?;
            tracing::debug!(identifier = %identifier, index = %name, indexed, "Index caught up");
            total += indexed;
        }
        Ok(total)
    }

    /// Every function with its most recent result.
    ///
    /// With a public base URL, each result links to
    /// `{base}/functions/{identifier}/{key}`.
    pub fn dashboard(&self) -> StashResult<Vec<DashboardEntry>> {
        let mut entries = Vec::with_capacity(self.functions.len());
        for (identifier, function) in &self.functions {
            let latest = match function.latest_meta()? {
                Some(meta) => Some(match self.result_url(identifier, &meta.key) {
                    Some(uri) => meta.with_public_uri(uri),
                    None => meta,
                }),
                None => None,
            };
            entries.push(DashboardEntry {
                function: summary(function.as_ref()),
                latest,
            });
        }
        Ok(entries)
    }

    fn result_url(&self, identifier: &str, key: &Key) -> Option<Url> {
        let mut url = self.public_base_url.clone()?;
        let key = key.to_string();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["functions", identifier, key.as_str()]);
        Some(url)
    }
}

fn function_url(identifier: &str) -> String {
    format!("/functions/{}", identifier)
}

fn feed_url(identifier: &str) -> String {
    format!("/feed/{}", identifier)
}

fn summary(function: &dyn CachedFunction) -> FunctionSummary {
    let identifier = function.identifier();
    FunctionSummary {
        identifier: identifier.to_string(),
        name: function.name().to_string(),
        description: function.description().map(str::to_string),
        content_type: function.content_type().to_string(),
        code: function.source().to_string(),
        url: function_url(identifier),
        feed_url: feed_url(identifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_catalog() {
        let catalog = Catalog::default();
        assert!(catalog.list_functions().is_empty());
        assert!(catalog.dashboard().expect("dashboard").is_empty());
        assert_eq!(catalog.catch_up_indexes().expect("catch up"), 0);
        let err = catalog.search("fn", "idx", "q").expect_err("unknown function");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_result_url_requires_base() {
        let key = Key::from("fn_abc");
        assert!(Catalog::new().result_url("fn", &key).is_none());

        let catalog = Catalog::new()
            .with_public_base_url(Url::parse("https://stash.example/app/").expect("url"));
        let url = catalog.result_url("fn", &key).expect("url");
        assert_eq!(url.as_str(), "https://stash.example/app/functions/fn/fn_abc");
    }
}
