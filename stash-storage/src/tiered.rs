//! Local-first store with a durable backup tier.
//!
//! Reads go to the embedded store first and fall back to the remote tier,
//! warming the local copy on the way back. Writes go local then remote,
//! synchronously. The remote tier has no feed: feed, offsets and index
//! partitions are local state.

use std::sync::Arc;

use stash_core::{
    ConfigError, EmbeddedConfig, FeedEntry, RemoteConfig, StashConfig, StashResult, StorageError,
    StoredRecord,
};
use url::Url;

use crate::embedded::EmbeddedStore;
use crate::remote::RemoteStore;
use crate::traits::{Collection, FeedIter, FeedStore, KeyIter};

/// Embedded store backed by a remote collection.
pub struct TieredStore {
    local: EmbeddedStore,
    remote: Arc<dyn Collection>,
}

impl TieredStore {
    pub fn new(local: EmbeddedStore, remote: Arc<dyn Collection>) -> Self {
        Self { local, remote }
    }

    /// Open both tiers from `config`.
    ///
    /// A `LocalBackup` remote is a second LMDB environment without a feed.
    pub fn from_config(config: &StashConfig) -> StashResult<Self> {
        config.validate()?;
        if config.remote == RemoteConfig::None {
            return Err(ConfigError::MissingRequired {
                field: "remote".to_string(),
            }
            .into());
        }

        let remote: Arc<dyn Collection> = match &config.remote {
            RemoteConfig::LocalBackup { path } => {
                let backup = EmbeddedConfig {
                    path: path.clone(),
                    build_feed: false,
                    public_base_url: None,
                    ..config.embedded.clone()
                };
                Arc::new(EmbeddedStore::open(&backup, config.key_delimiter)?)
            }
            other => match RemoteStore::from_config(other)? {
                Some(remote) => Arc::new(remote.with_page_size(config.embedded.scan_page_size)),
                None => {
                    return Err(ConfigError::MissingRequired {
                        field: "remote".to_string(),
                    }
                    .into())
                }
            },
        };

        let local = EmbeddedStore::open(&config.embedded, config.key_delimiter)?;
        tracing::info!(
            local = %local.describe(),
            remote = %remote.describe(),
            "Opened tiered store"
        );
        Ok(Self::new(local, remote))
    }

    pub fn local(&self) -> &EmbeddedStore {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn Collection> {
        &self.remote
    }
}

impl Collection for TieredStore {
    fn describe(&self) -> String {
        format!("{} -> {}", self.local.describe(), self.remote.describe())
    }

    fn get(&self, key: &[u8]) -> StashResult<Vec<u8>> {
        self.get_record(key).map(|record| record.value)
    }

    fn get_record(&self, key: &[u8]) -> StashResult<StoredRecord> {
        match self.local.get_record(key) {
            Ok(record) => return Ok(record),
            Err(e) if e.is_missing_key() => {}
            Err(e) => return Err(e),
        }

        let record = self.remote.get_record(key)?;
        if let Err(e) = self.local.put(key, &record.value, None) {
            tracing::warn!(
                key = %String::from_utf8_lossy(key),
                error = %e,
                "Failed to backfill local tier"
            );
        }
        Ok(record)
    }

    fn put(&self, key: &[u8], value: &[u8], content_type: Option<&str>) -> StashResult<()> {
        self.local.put(key, value, content_type)?;
        self.remote.put(key, value, content_type).map_err(|e| {
            let key = String::from_utf8_lossy(key).into_owned();
            tracing::error!(
                key = %key,
                remote = %self.remote.describe(),
                error = %e,
                "Remote write failed after local write"
            );
            StorageError::TierInconsistency {
                key,
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn contains(&self, key: &[u8]) -> StashResult<bool> {
        if self.local.contains(key)? {
            return Ok(true);
        }
        self.remote.contains(key)
    }

    fn delete(&self, key: &[u8]) -> StashResult<()> {
        self.local.delete(key)?;
        self.remote.delete(key)
    }

    fn content_length(&self, key: &[u8]) -> StashResult<u64> {
        match self.local.content_length(key) {
            Err(e) if e.is_missing_key() => self.remote.content_length(key),
            other => other,
        }
    }

    fn content_type(&self, key: &[u8]) -> StashResult<Option<String>> {
        match self.local.content_type(key) {
            Err(e) if e.is_missing_key() => self.remote.content_type(key),
            other => other,
        }
    }

    fn iter_prefix(&self, start: &[u8], prefix: &[u8]) -> StashResult<KeyIter> {
        self.local.iter_prefix(start, prefix)
    }

    fn public_uri(&self, key: &[u8]) -> StashResult<Url> {
        match self.local.public_uri(key) {
            Err(e) if e.is_unsupported() => self.remote.public_uri(key),
            other => other,
        }
    }
}

impl FeedStore for TieredStore {
    fn delimiter(&self) -> char {
        self.local.delimiter()
    }

    fn feed(&self, identifier: &str, offset: Option<&[u8]>) -> StashResult<FeedIter> {
        self.local.feed(identifier, offset)
    }

    fn latest(&self, identifier: &str) -> StashResult<Option<FeedEntry>> {
        self.local.latest(identifier)
    }

    fn offset(&self) -> StashResult<Option<Vec<u8>>> {
        self.local.offset()
    }

    fn advance_offset(&self, offset: &[u8]) -> StashResult<bool> {
        self.local.advance_offset(offset)
    }

    fn index_storage(&self, name: &str) -> StashResult<EmbeddedStore> {
        self.local.index_storage(name)
    }
}

/// Open the store described by `config`: embedded only, or tiered when a
/// remote is configured.
pub fn open_store(config: &StashConfig) -> StashResult<Arc<dyn FeedStore>> {
    config.validate()?;
    match config.remote {
        RemoteConfig::None => Ok(Arc::new(EmbeddedStore::open(
            &config.embedded,
            config.key_delimiter,
        )?)),
        _ => Ok(Arc::new(TieredStore::from_config(config)?)),
    }
}
