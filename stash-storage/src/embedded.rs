//! LMDB-backed embedded store with an append-only feed.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment holds any
//! number of partitions; each partition is a pair of named databases:
//!
//! - `{partition}`: key -> value
//! - `{partition}:content-type`: key -> content-type tag
//!
//! plus two databases shared by the whole environment:
//!
//! - `offsets`: partition name -> last processed feed key
//! - `feed`: `{base_key}{delimiter}{id}` -> key, only for partitions opened
//!   with feed building enabled
//!
//! # Atomicity
//!
//! `put` writes the value, its content type, the feed entry and the partition
//! offset in one write transaction. LMDB admits one writer per environment, so
//! feed ids are assigned under that lock and strictly increase per base key.
//! Readers see a snapshot as of their transaction start.

use std::fmt;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use stash_core::config::check_partition_name;
use stash_core::ids::successor;
use stash_core::{
    base_key, identifier_prefix, EmbeddedConfig, FeedEntry, IdGenerator, Key, StashError,
    StashResult, StorageError, StoredRecord, UuidV7Ids,
};
use url::Url;

use crate::scan::{key_only, PagedScan};
use crate::traits::{Collection, FeedIter, FeedStore, KeyIter};

const OFFSETS_DB: &str = "offsets";
const FEED_DB: &str = "feed";

/// Error type for LMDB operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddedStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment at {path}: {reason}")]
    EnvOpen { path: String, reason: String },

    /// Failed to open a named database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmbeddedStoreError {
    pub(crate) fn txn(e: heed::Error) -> Self {
        EmbeddedStoreError::Transaction(e.to_string())
    }
}

impl From<EmbeddedStoreError> for StashError {
    fn from(e: EmbeddedStoreError) -> Self {
        StashError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

/// Derives the feed partition (base key) of a written key.
pub type BaseKeyExtractor = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// One partition of an LMDB environment.
///
/// Cloning is cheap and clones share the environment.
#[derive(Clone)]
pub struct EmbeddedStore {
    env: Env,
    path: PathBuf,
    partition: Arc<str>,
    data: Database<Bytes, Bytes>,
    content_types: Database<Bytes, Str>,
    offsets: Database<Str, Bytes>,
    feed: Option<Database<Bytes, Bytes>>,
    ids: Arc<dyn IdGenerator>,
    base_key: BaseKeyExtractor,
    delimiter: char,
    page_size: usize,
    public_base_url: Option<Url>,
}

impl fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedStore")
            .field("path", &self.path)
            .field("partition", &self.partition)
            .field("feed", &self.feed.is_some())
            .field("delimiter", &self.delimiter)
            .finish()
    }
}

impl EmbeddedStore {
    /// Open (creating if needed) the environment at `config.path` and its
    /// data partition.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened (including when this process
    ///   already has it open; share the store with `clone` instead)
    /// - A database cannot be created
    pub fn open(config: &EmbeddedConfig, delimiter: char) -> StashResult<Self> {
        check_partition_name(&config.data_partition)?;
        std::fs::create_dir_all(&config.path).map_err(EmbeddedStoreError::from)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size_mb * 1024 * 1024)
                .max_dbs(config.max_partitions)
                .open(&config.path)
        }
        .map_err(|e| EmbeddedStoreError::EnvOpen {
            path: config.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(EmbeddedStoreError::txn)?;
        let (data, content_types) = create_partition(&env, &mut wtxn, &config.data_partition)?;
        let offsets: Database<Str, Bytes> = create_named(&env, &mut wtxn, OFFSETS_DB)?;
        let feed = if config.build_feed {
            Some(create_named(&env, &mut wtxn, FEED_DB)?)
        } else {
            None
        };
        wtxn.commit().map_err(EmbeddedStoreError::txn)?;

        tracing::debug!(
            path = %config.path.display(),
            partition = %config.data_partition,
            feed = config.build_feed,
            "Opened embedded store"
        );

        Ok(Self {
            env,
            path: config.path.clone(),
            partition: Arc::from(config.data_partition.as_str()),
            data,
            content_types,
            offsets,
            feed,
            ids: Arc::new(UuidV7Ids::new()),
            base_key: default_base_key(delimiter),
            delimiter,
            page_size: config.scan_page_size,
            public_base_url: config.public_base_url.clone(),
        })
    }

    /// Open with default settings at `path`.
    pub fn open_path(path: impl AsRef<Path>, delimiter: char) -> StashResult<Self> {
        let config = EmbeddedConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        };
        Self::open(&config, delimiter)
    }

    /// Replace the feed id source.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the function deriving a written key's feed partition.
    pub fn with_base_key_extractor(mut self, extractor: BaseKeyExtractor) -> Self {
        self.base_key = extractor;
        self
    }

    /// Serve public URIs under `base`.
    pub fn with_public_base_url(mut self, base: Url) -> Self {
        self.public_base_url = Some(base);
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_feed(&self) -> bool {
        self.feed.is_some()
    }

    fn feed_db(&self) -> StashResult<Database<Bytes, Bytes>> {
        self.feed.ok_or_else(|| {
            StorageError::FeedDisabled {
                partition: self.partition.to_string(),
            }
            .into()
        })
    }

    /// Append a feed entry for `key` inside `wtxn`, returning the feed key.
    fn append_feed(
        &self,
        wtxn: &mut RwTxn<'_>,
        feed: Database<Bytes, Bytes>,
        key: &[u8],
    ) -> Result<Vec<u8>, EmbeddedStoreError> {
        let prefix = identifier_prefix(&(self.base_key)(key), self.delimiter);

        let last_id = {
            let mut rev = feed
                .rev_prefix_iter(&*wtxn, &prefix)
                .map_err(EmbeddedStoreError::txn)?;
            match rev.next() {
                Some(item) => {
                    let (last, _) = item.map_err(EmbeddedStoreError::txn)?;
                    Some(String::from_utf8_lossy(&last[prefix.len()..]).into_owned())
                }
                None => None,
            }
        };

        let mut id = self.ids.next_id();
        if let Some(last) = last_id {
            if id <= last {
                id = successor(&last).unwrap_or_else(|| format!("{}0", last));
            }
        }

        let mut feed_key = prefix;
        feed_key.extend_from_slice(id.as_bytes());
        feed.put(wtxn, &feed_key, key)
            .map_err(EmbeddedStoreError::txn)?;
        self.offsets
            .put(wtxn, &self.partition, &feed_key)
            .map_err(EmbeddedStoreError::txn)?;
        Ok(feed_key)
    }
}

fn default_base_key(delimiter: char) -> BaseKeyExtractor {
    Arc::new(move |key: &[u8]| base_key(key, delimiter).to_vec())
}

fn create_named<K: 'static, V: 'static>(
    env: &Env,
    wtxn: &mut RwTxn<'_>,
    name: &str,
) -> Result<Database<K, V>, EmbeddedStoreError> {
    env.create_database(wtxn, Some(name))
        .map_err(|e| EmbeddedStoreError::DbOpen {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn create_partition(
    env: &Env,
    wtxn: &mut RwTxn<'_>,
    name: &str,
) -> Result<(Database<Bytes, Bytes>, Database<Bytes, Str>), EmbeddedStoreError> {
    let data = create_named(env, wtxn, name)?;
    let content_types = create_named(env, wtxn, &format!("{}:content-type", name))?;
    Ok((data, content_types))
}

impl Collection for EmbeddedStore {
    fn describe(&self) -> String {
        format!("lmdb://{}#{}", self.path.display(), self.partition)
    }

    fn get(&self, key: &[u8]) -> StashResult<Vec<u8>> {
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        match self.data.get(&rtxn, key).map_err(EmbeddedStoreError::txn)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StorageError::not_found(key).into()),
        }
    }

    fn get_record(&self, key: &[u8]) -> StashResult<StoredRecord> {
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        let value = self
            .data
            .get(&rtxn, key)
            .map_err(EmbeddedStoreError::txn)?
            .ok_or_else(|| StorageError::not_found(key))?
            .to_vec();
        let content_type = self
            .content_types
            .get(&rtxn, key)
            .map_err(EmbeddedStoreError::txn)?
            .map(str::to_string);
        Ok(StoredRecord::new(value, content_type))
    }

    fn put(&self, key: &[u8], value: &[u8], content_type: Option<&str>) -> StashResult<()> {
        let mut wtxn = self.env.write_txn().map_err(EmbeddedStoreError::txn)?;

        self.data
            .put(&mut wtxn, key, value)
            .map_err(EmbeddedStoreError::txn)?;
        match content_type {
            Some(ct) => self
                .content_types
                .put(&mut wtxn, key, ct)
                .map_err(EmbeddedStoreError::txn)?,
            None => {
                self.content_types
                    .delete(&mut wtxn, key)
                    .map_err(EmbeddedStoreError::txn)?;
            }
        }

        if let Some(feed) = self.feed {
            let feed_key = self.append_feed(&mut wtxn, feed, key)?;
            tracing::trace!(
                key = %String::from_utf8_lossy(key),
                feed_key = %String::from_utf8_lossy(&feed_key),
                "Appended feed entry"
            );
        }

        wtxn.commit().map_err(EmbeddedStoreError::txn)?;
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StashResult<bool> {
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        Ok(self
            .data
            .get(&rtxn, key)
            .map_err(EmbeddedStoreError::txn)?
            .is_some())
    }

    fn delete(&self, key: &[u8]) -> StashResult<()> {
        let mut wtxn = self.env.write_txn().map_err(EmbeddedStoreError::txn)?;
        self.data
            .delete(&mut wtxn, key)
            .map_err(EmbeddedStoreError::txn)?;
        self.content_types
            .delete(&mut wtxn, key)
            .map_err(EmbeddedStoreError::txn)?;
        wtxn.commit().map_err(EmbeddedStoreError::txn)?;
        Ok(())
    }

    fn content_length(&self, key: &[u8]) -> StashResult<u64> {
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        match self.data.get(&rtxn, key).map_err(EmbeddedStoreError::txn)? {
            Some(value) => Ok(value.len() as u64),
            None => Err(StorageError::not_found(key).into()),
        }
    }

    fn content_type(&self, key: &[u8]) -> StashResult<Option<String>> {
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        if self
            .data
            .get(&rtxn, key)
            .map_err(EmbeddedStoreError::txn)?
            .is_none()
        {
            return Err(StorageError::not_found(key).into());
        }
        Ok(self
            .content_types
            .get(&rtxn, key)
            .map_err(EmbeddedStoreError::txn)?
            .map(str::to_string))
    }

    fn iter_prefix(&self, start: &[u8], prefix: &[u8]) -> StashResult<KeyIter> {
        Ok(Box::new(PagedScan::new(
            self.env.clone(),
            self.data,
            Bound::Included(start.to_vec()),
            prefix.to_vec(),
            self.page_size,
            key_only,
        )))
    }

    fn public_uri(&self, key: &[u8]) -> StashResult<Url> {
        let base = self
            .public_base_url
            .as_ref()
            .ok_or_else(|| StorageError::unsupported("public_uri on a private embedded store"))?;
        let identifier = String::from_utf8_lossy(base_key(key, self.delimiter)).into_owned();
        let key_text = String::from_utf8_lossy(key).into_owned();

        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::unsupported(format!("public_uri under base {}", base)))?
            .pop_if_empty()
            .extend(["functions", identifier.as_str(), key_text.as_str()]);
        Ok(url)
    }
}

fn feed_entry(feed_key: &[u8], key: &[u8]) -> FeedEntry {
    FeedEntry::new(feed_key.to_vec(), Key::from_bytes(key))
}

impl FeedStore for EmbeddedStore {
    fn delimiter(&self) -> char {
        self.delimiter
    }

    fn feed(&self, identifier: &str, offset: Option<&[u8]>) -> StashResult<FeedIter> {
        let feed = self.feed_db()?;
        let prefix = identifier_prefix(identifier.as_bytes(), self.delimiter);
        let start = match offset {
            Some(offset) if !offset.starts_with(&prefix) => {
                return Err(StorageError::InvalidOffset {
                    offset: String::from_utf8_lossy(offset).into_owned(),
                    identifier: identifier.to_string(),
                }
                .into());
            }
            Some(offset) => Bound::Excluded(offset.to_vec()),
            None => Bound::Included(prefix.clone()),
        };
        Ok(Box::new(PagedScan::new(
            self.env.clone(),
            feed,
            start,
            prefix,
            self.page_size,
            feed_entry,
        )))
    }

    fn latest(&self, identifier: &str) -> StashResult<Option<FeedEntry>> {
        let feed = self.feed_db()?;
        let prefix = identifier_prefix(identifier.as_bytes(), self.delimiter);
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        let mut rev = feed
            .rev_prefix_iter(&rtxn, &prefix)
            .map_err(EmbeddedStoreError::txn)?;
        match rev.next() {
            Some(item) => {
                let (feed_key, key) = item.map_err(EmbeddedStoreError::txn)?;
                Ok(Some(feed_entry(feed_key, key)))
            }
            None => Ok(None),
        }
    }

    fn offset(&self) -> StashResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(EmbeddedStoreError::txn)?;
        Ok(self
            .offsets
            .get(&rtxn, &self.partition)
            .map_err(EmbeddedStoreError::txn)?
            .map(<[u8]>::to_vec))
    }

    fn advance_offset(&self, offset: &[u8]) -> StashResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(EmbeddedStoreError::txn)?;
        let current = self
            .offsets
            .get(&wtxn, &self.partition)
            .map_err(EmbeddedStoreError::txn)?
            .map(<[u8]>::to_vec);

        if let Some(current) = current {
            let same_partition =
                base_key(&current, self.delimiter) == base_key(offset, self.delimiter);
            if same_partition && current.as_slice() >= offset {
                return Ok(false);
            }
        }

        self.offsets
            .put(&mut wtxn, &self.partition, offset)
            .map_err(EmbeddedStoreError::txn)?;
        wtxn.commit().map_err(EmbeddedStoreError::txn)?;
        Ok(true)
    }

    fn index_storage(&self, name: &str) -> StashResult<EmbeddedStore> {
        check_partition_name(name)?;
        if name == &*self.partition {
            return Err(stash_core::ConfigError::InvalidValue {
                field: "partition".to_string(),
                value: name.to_string(),
                reason: "index partition must differ from its source partition".to_string(),
            }
            .into());
        }

        let mut wtxn = self.env.write_txn().map_err(EmbeddedStoreError::txn)?;
        let (data, content_types) = create_partition(&self.env, &mut wtxn, name)?;
        wtxn.commit().map_err(EmbeddedStoreError::txn)?;

        Ok(EmbeddedStore {
            env: self.env.clone(),
            path: self.path.clone(),
            partition: Arc::from(name),
            data,
            content_types,
            offsets: self.offsets,
            feed: None,
            ids: Arc::clone(&self.ids),
            base_key: Arc::clone(&self.base_key),
            delimiter: self.delimiter,
            page_size: self.page_size,
            public_base_url: None,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
