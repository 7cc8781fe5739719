//! Feed-driven secondary index over one orchestrator.
//!
//! # Key Format
//!
//! ```text
//! {sub_key}{delimiter}{document_key}{delimiter}{ordinal}  ->  JSON document
//! ```
//!
//! `ordinal` is the position of the pair in one extraction, so a single write
//! may emit the same sub-key several times. Documents live in their own
//! partition of the source's embedded environment, and that partition's
//! offset records the last feed entry indexed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use stash_cache::{ListenerId, Memo, WriteNotification};
use stash_core::{
    Args, CodecError, ExtractionError, Key, StashError, StashResult, SupportedContentType,
};
use stash_storage::{Collection, EmbeddedStore, FeedStore};

use crate::ranking::{rank, RankedDocument};

/// Maps one stored value to `(sub_key, document)` pairs.
pub type Extractor<V> = Box<dyn Fn(&Key, &V, &Args) -> Vec<(String, Value)> + Send + Sync>;

/// Secondary index fed by a [`Memo`]'s writes.
pub struct IndexEngine<V> {
    name: String,
    source: Arc<Memo<V>>,
    dest: EmbeddedStore,
    extract: Extractor<V>,
    processed: AtomicU64,
    listener: OnceLock<ListenerId>,
}

impl<V> fmt::Debug for IndexEngine<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexEngine")
            .field("name", &self.name)
            .field("source", &self.source.identifier())
            .field("partition", &self.dest.partition())
            .field("processed", &self.processed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V: 'static> IndexEngine<V> {
    /// Open the `name` partition next to `source`'s data.
    ///
    /// With `register_listener`, every fresh write to `source` is indexed as
    /// it happens. Those writes do not move the offset; [`index`](Self::index)
    /// still visits them and rewrites identical documents.
    pub fn new<F>(
        name: impl Into<String>,
        source: Arc<Memo<V>>,
        extract: F,
        register_listener: bool,
    ) -> StashResult<Arc<Self>>
    where
        F: Fn(&Key, &V, &Args) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        let name = name.into();
        let dest = source.store().index_storage(&name)?;
        let engine = Arc::new(Self {
            name,
            source,
            dest,
            extract: Box::new(extract),
            processed: AtomicU64::new(0),
            listener: OnceLock::new(),
        });

        if register_listener {
            let weak = Arc::downgrade(&engine);
            let id = engine
                .source
                .register_listener(move |n: &WriteNotification<'_, V>| match weak.upgrade() {
                    Some(engine) => engine
                        .extract_and_store(n.key, n.value, None, n.args)
                        .map(|_| ()),
                    None => Ok(()),
                });
            if engine.listener.set(id).is_err() {
                // one listener per engine, Drop only removes the stored id
                engine.source.remove_listener(id);
            }
        }

        tracing::debug!(
            index = %engine.name,
            source = %engine.source.identifier(),
            listening = register_listener,
            "Opened index"
        );
        Ok(engine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<Memo<V>> {
        &self.source
    }

    /// The partition holding this index's documents.
    pub fn storage(&self) -> &EmbeddedStore {
        &self.dest
    }

    /// Feed entries indexed by this engine since it was opened.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Last indexed feed entry, persisted across sessions.
    pub fn offset(&self) -> StashResult<Option<Vec<u8>>> {
        self.dest.offset()
    }

    /// Extract documents from one value and store them.
    ///
    /// A document without a `key` field is logged and skipped; other errors
    /// abort. Returns the number of documents stored.
    pub fn extract_and_store(
        &self,
        document_key: &Key,
        value: &V,
        feed_offset: Option<&[u8]>,
        args: &Args,
    ) -> StashResult<usize> {
        let pairs = (self.extract)(document_key, value, args);
        let mut stored = 0;
        for (ordinal, (sub_key, document)) in pairs.into_iter().enumerate() {
            match self.store_document(&sub_key, document_key, ordinal, &document) {
                Ok(()) => stored += 1,
                Err(StashError::Extraction(e)) => {
                    tracing::warn!(
                        index = %self.name,
                        key = %document_key,
                        ordinal,
                        error = %e,
                        "Skipping index document"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(offset) = feed_offset {
            self.dest.advance_offset(offset)?;
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(stored)
    }

    fn store_document(
        &self,
        sub_key: &str,
        document_key: &Key,
        ordinal: usize,
        document: &Value,
    ) -> StashResult<()> {
        if document.get("key").is_none() {
            return Err(ExtractionError::MissingKeyField {
                sub_key: sub_key.to_string(),
            }
            .into());
        }
        let bytes = serde_json::to_vec(document).map_err(|e| ExtractionError::InvalidDocument {
            sub_key: sub_key.to_string(),
            reason: e.to_string(),
        })?;
        let key = index_key(sub_key, self.source.delimiter(), document_key, ordinal);
        self.dest
            .put(&key, &bytes, Some(SupportedContentType::Json.as_str()))
    }

    /// Catch up on every source write after the stored offset.
    ///
    /// Returns the number of feed entries indexed in this pass. Entries whose
    /// value was deleted since are skipped and still move the offset.
    pub fn index(&self) -> StashResult<usize> {
        let offset = self.dest.offset()?;
        let mut indexed = 0;
        for entry in self.source.feed(offset.as_deref())? {
            let entry = entry?;
            if offset.as_deref() == Some(entry.timestamp.as_slice()) {
                continue;
            }
            let value = match self.source.get_value(&entry.key) {
                Ok(value) => value,
                Err(e) if e.is_missing_key() => {
                    tracing::warn!(
                        index = %self.name,
                        key = %entry.key,
                        "Feed entry has no stored value, skipping"
                    );
                    self.dest.advance_offset(&entry.timestamp)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.extract_and_store(&entry.key, &value, Some(&entry.timestamp), &Args::default())?;
            indexed += 1;
        }
        tracing::info!(index = %self.name, indexed, "Index caught up");
        Ok(indexed)
    }

    /// Documents whose sub-key starts with `query`, one per `key`, most
    /// matches first.
    pub fn search(&self, query: &str) -> StashResult<Vec<Value>> {
        Ok(self
            .search_ranked(query)?
            .into_iter()
            .map(|ranked| ranked.document)
            .collect())
    }

    /// Like [`search`](Self::search), keeping the match counts.
    pub fn search_ranked(&self, query: &str) -> StashResult<Vec<RankedDocument>> {
        let prefix = query.as_bytes();
        let mut documents = Vec::new();
        for key in self.dest.iter_prefix(prefix, prefix)? {
            let bytes = self.dest.get(&key?)?;
            let document: Value =
                serde_json::from_slice(&bytes).map_err(|e| CodecError::Decode {
                    codec: "json",
                    reason: e.to_string(),
                })?;
            documents.push(document);
        }
        Ok(rank(documents))
    }
}

impl<V> Drop for IndexEngine<V> {
    fn drop(&mut self) {
        if let Some(id) = self.listener.get() {
            self.source.remove_listener(*id);
        }
    }
}

/// `{sub_key}{delimiter}{document_key}{delimiter}{ordinal}`.
pub fn index_key(sub_key: &str, delimiter: char, document_key: &Key, ordinal: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(sub_key.len() + document_key.as_bytes().len() + 8);
    key.extend_from_slice(sub_key.as_bytes());
    let mut buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut buf).as_bytes();
    key.extend_from_slice(delim);
    key.extend_from_slice(document_key.as_bytes());
    key.extend_from_slice(delim);
    key.extend_from_slice(ordinal.to_string().as_bytes());
    key
}
