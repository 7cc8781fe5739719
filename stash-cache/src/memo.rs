//! The cache orchestrator.
//!
//! A [`Memo`] binds one computation to a feed store. Calls derive a key from
//! the computation's identity and the call's arguments, answer from the store
//! when they can, and otherwise compute, store, and notify listeners.
//!
//! There is no lock around check-then-compute: two callers missing on the same
//! key both compute and the later write wins.

use std::fmt;
use std::sync::Arc;

use stash_core::{
    identifier_prefix, Args, Codec, ComputationDescriptor, FeedEntry, Key, MetaData,
    ParamsFingerprint, StashResult, StorageError,
};
use stash_storage::{FeedIter, FeedStore};

use crate::listener::{ListenerId, ListenerRegistry, WriteNotification};
use crate::stats::{MemoStats, StatsCounter};

/// The wrapped computation.
pub type ComputationFn<V> = Box<dyn Fn(&Args) -> StashResult<V> + Send + Sync>;

/// Hook run on every value served from the store.
pub type ReadHook<V> = Box<dyn Fn(&V) + Send + Sync>;

/// Lazy sequence of keys owned by one orchestrator.
pub type KeysIter = Box<dyn Iterator<Item = StashResult<Key>> + Send>;

/// Memoizing wrapper around one computation.
///
/// Build one with [`MemoBuilder`](crate::MemoBuilder).
pub struct Memo<V> {
    pub(crate) descriptor: ComputationDescriptor,
    pub(crate) identifier: String,
    pub(crate) prefix: Vec<u8>,
    pub(crate) delimiter: char,
    pub(crate) computation: ComputationFn<V>,
    pub(crate) store: Arc<dyn FeedStore>,
    pub(crate) params: ParamsFingerprint,
    pub(crate) codec: Box<dyn Codec<V>>,
    pub(crate) prefer_cache: bool,
    pub(crate) read_hook: Option<ReadHook<V>>,
    pub(crate) listeners: ListenerRegistry<V>,
    pub(crate) stats: StatsCounter,
}

impl<V> fmt::Debug for Memo<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("name", &self.descriptor.name)
            .field("identifier", &self.identifier)
            .field("store", &self.store.describe())
            .field("content_type", &self.codec.content_type())
            .field("prefer_cache", &self.prefer_cache)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<V> Memo<V> {
    /// The identifier half of every key this orchestrator writes.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn descriptor(&self) -> &ComputationDescriptor {
        &self.descriptor
    }

    /// Content type declared by the codec.
    pub fn content_type(&self) -> &str {
        self.codec.content_type()
    }

    pub fn store(&self) -> &Arc<dyn FeedStore> {
        &self.store
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn prefer_cache(&self) -> bool {
        self.prefer_cache
    }

    pub fn stats(&self) -> MemoStats {
        self.stats.snapshot()
    }

    /// `{identifier}{delimiter}{params fingerprint}` for `args`.
    pub fn key(&self, args: &Args) -> StashResult<Key> {
        let params = self.params.derive(args)?;
        Ok(Key::compose(&self.identifier, self.delimiter, &params))
    }

    /// Return the stored value for `args`, computing and storing it on a miss.
    ///
    /// With `prefer_cache` off the computation always runs and overwrites.
    pub fn call(&self, args: &Args) -> StashResult<V> {
        let key = self.key(args)?;
        if self.prefer_cache {
            match self.store.get(key.as_bytes()) {
                Ok(bytes) => {
                    let value = self.codec.decode(&bytes)?;
                    self.stats.hit();
                    tracing::debug!(key = %key, "Cache hit");
                    if let Some(hook) = &self.read_hook {
                        hook(&value);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_missing_key() => {
                    self.stats.miss();
                    tracing::debug!(key = %key, "Cache miss");
                }
                Err(e) => return Err(e),
            }
        }
        self.compute_and_store(&key, args)
    }

    fn compute_and_store(&self, key: &Key, args: &Args) -> StashResult<V> {
        let value = (self.computation)(args)?;
        self.stats.computed();
        let bytes = self.codec.encode(&value)?;
        self.store
            .put(key.as_bytes(), &bytes, Some(self.codec.content_type()))?;
        self.listeners.notify(&WriteNotification {
            key,
            value: &value,
            args,
        })?;
        Ok(value)
    }

    pub fn exists(&self, args: &Args) -> StashResult<bool> {
        let key = self.key(args)?;
        self.store.contains(key.as_bytes())
    }

    /// Metadata for the value stored under `args`.
    pub fn meta(&self, args: &Args) -> StashResult<MetaData> {
        let key = self.key(args)?;
        self.meta_for_key(&key)
    }

    /// Metadata for a stored key of this orchestrator.
    pub fn meta_for_key(&self, key: &Key) -> StashResult<MetaData> {
        self.ensure_owned(key)?;
        let content_length = self.store.content_length(key.as_bytes())?;
        let content_type = self.store.content_type(key.as_bytes())?;
        Ok(self.build_meta(key, content_length, content_type))
    }

    /// Raw stored bytes and their metadata, without decoding.
    pub fn get_raw(&self, key: &Key) -> StashResult<(Vec<u8>, MetaData)> {
        self.ensure_owned(key)?;
        let record = self.store.get_record(key.as_bytes())?;
        let meta = self.build_meta(key, record.value.len() as u64, record.content_type);
        Ok((record.value, meta))
    }

    /// Decoded value stored under `key`, without running the computation.
    pub fn get_value(&self, key: &Key) -> StashResult<V> {
        self.ensure_owned(key)?;
        let bytes = self.store.get(key.as_bytes())?;
        Ok(self.codec.decode(&bytes)?)
    }

    fn ensure_owned(&self, key: &Key) -> StashResult<()> {
        if key.as_bytes().starts_with(&self.prefix) {
            Ok(())
        } else {
            Err(StorageError::not_found(key.as_bytes()).into())
        }
    }

    fn build_meta(&self, key: &Key, content_length: u64, content_type: Option<String>) -> MetaData {
        let public_uri = match self.store.public_uri(key.as_bytes()) {
            Ok(uri) => Some(uri),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "No public URI");
                None
            }
        };
        MetaData {
            key: key.clone(),
            public_uri,
            content_type: content_type.unwrap_or_else(|| self.codec.content_type().to_string()),
            content_length,
            identifier: self.identifier.clone(),
        }
    }

    /// Every stored key of this orchestrator, in key order.
    pub fn iter_keys(&self) -> StashResult<KeysIter> {
        let keys = self.store.iter_prefix(&self.prefix, &self.prefix)?;
        Ok(Box::new(keys.map(|key| key.map(Key::from_bytes))))
    }

    /// This orchestrator's writes, strictly after `offset` when given.
    pub fn feed(&self, offset: Option<&[u8]>) -> StashResult<FeedIter> {
        self.store.feed(&self.identifier, offset)
    }

    pub fn most_recent_entry(&self) -> StashResult<Option<FeedEntry>> {
        self.store.latest(&self.identifier)
    }

    pub fn most_recent_key(&self) -> StashResult<Option<Key>> {
        Ok(self.most_recent_entry()?.map(|entry| entry.key))
    }

    pub fn most_recent_meta(&self) -> StashResult<Option<MetaData>> {
        match self.most_recent_key()? {
            Some(key) => self.meta_for_key(&key).map(Some),
            None => Ok(None),
        }
    }

    /// Add a write listener. Listener errors fail the triggering call after
    /// the value has been stored.
    pub fn register_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WriteNotification<'_, V>) -> StashResult<()> + Send + Sync + 'static,
    {
        self.listeners.register(Arc::new(listener))
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

pub(crate) fn key_prefix(identifier: &str, delimiter: char) -> Vec<u8> {
    identifier_prefix(identifier.as_bytes(), delimiter)
}
