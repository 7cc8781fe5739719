//! Durable object-store tier.
//!
//! Wraps any `object_store` backend (S3, local filesystem, in-memory) behind
//! the blocking [`Collection`] interface. Each store owns a current-thread
//! tokio runtime and blocks on it per call, so it must not be used from
//! inside another async runtime's worker thread.
//!
//! Keys map to object paths verbatim (`/` separates path segments). The
//! content type travels as object metadata on backends that support
//! attributes.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjPath;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectStore, PutOptions, PutPayload,
};
use stash_core::{RemoteConfig, StashError, StashResult, StorageError, StoredRecord};
use tokio::runtime::Runtime;
use url::Url;

use crate::traits::{Collection, KeyIter};

pub type DynStore = Arc<dyn ObjectStore>;

/// Error type for object-store operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store {store} failed: {source}")]
    Backend {
        store: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Failed to start blocking runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<RemoteStoreError> for StashError {
    fn from(e: RemoteStoreError) -> Self {
        match e {
            RemoteStoreError::NotFound(key) => StashError::Storage(StorageError::NotFound { key }),
            RemoteStoreError::Backend { store, source } => {
                StashError::Storage(StorageError::Remote {
                    store,
                    reason: source.to_string(),
                })
            }
            RemoteStoreError::Runtime(e) => StashError::Storage(StorageError::Remote {
                store: "runtime".to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// How stored objects can be reached from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicAccess {
    Private,
    /// Publicly readable bucket, served at `https://{bucket}/{key}`.
    Bucket(String),
    /// Objects served under a base URL, at `{base}/{key}`.
    BaseUrl(Url),
}

/// Object-store backed [`Collection`].
pub struct RemoteStore {
    store: DynStore,
    runtime: Arc<Runtime>,
    label: String,
    public: PublicAccess,
    /// LocalFileSystem rejects object attributes.
    supports_attributes: bool,
    /// LocalFileSystem lists in directory order, not key order.
    sorted_listing: bool,
    page_size: usize,
}

impl RemoteStore {
    /// Wrap an existing object store.
    pub fn new(store: DynStore, label: impl Into<String>, public: PublicAccess) -> StashResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RemoteStoreError::from)?;
        Ok(Self {
            store,
            runtime: Arc::new(runtime),
            label: label.into(),
            public,
            supports_attributes: true,
            sorted_listing: true,
            page_size: 1000,
        })
    }

    /// In-process store, for tests and ephemeral deployments.
    pub fn memory() -> StashResult<Self> {
        Self::new(Arc::new(InMemory::new()), "memory", PublicAccess::Private)
    }

    /// Store rooted at a local directory, created if missing.
    pub fn file_system(path: impl AsRef<Path>, public_base_url: Option<Url>) -> StashResult<Self> {
        let base = path.as_ref();
        std::fs::create_dir_all(base).map_err(RemoteStoreError::from)?;
        let label = format!("file://{}", base.display());
        let fs = LocalFileSystem::new_with_prefix(base).map_err(|source| {
            RemoteStoreError::Backend {
                store: label.clone(),
                source,
            }
        })?;
        let public = public_base_url.map_or(PublicAccess::Private, PublicAccess::BaseUrl);
        let mut store = Self::new(Arc::new(fs), label, public)?;
        store.supports_attributes = false;
        store.sorted_listing = false;
        Ok(store)
    }

    /// S3 (or S3-compatible) bucket. Credentials come from the standard AWS
    /// environment variables.
    ///
    /// Bucket creation, ACLs and CORS rules are provisioned outside this
    /// process; construction only records the intended access mode.
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        public: bool,
        cors_enabled: bool,
    ) -> StashResult<Self> {
        let label = format!("s3://{}", bucket);
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let s3 = builder.build().map_err(|source| RemoteStoreError::Backend {
            store: label.clone(),
            source,
        })?;

        tracing::info!(
            bucket = %bucket,
            public,
            cors_enabled,
            "Using S3 remote tier; bucket policy and CORS are managed externally"
        );

        let access = if public {
            PublicAccess::Bucket(bucket.to_string())
        } else {
            PublicAccess::Private
        };
        Self::new(Arc::new(s3), label, access)
    }

    /// Build the object-store tier described by `config`.
    ///
    /// Returns `None` for configurations without an object store.
    pub fn from_config(config: &RemoteConfig) -> StashResult<Option<Self>> {
        match config {
            RemoteConfig::None | RemoteConfig::LocalBackup { .. } => Ok(None),
            RemoteConfig::Memory => Self::memory().map(Some),
            RemoteConfig::FileSystem {
                path,
                public_base_url,
            } => Self::file_system(path, public_base_url.clone()).map(Some),
            RemoteConfig::S3 {
                bucket,
                region,
                endpoint,
                public,
                cors_enabled,
            } => Self::s3(
                bucket,
                region.as_deref(),
                endpoint.as_deref(),
                *public,
                *cors_enabled,
            )
            .map(Some),
        }
    }

    /// Objects listed per request during prefix scans.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The wrapped object store.
    pub fn object_store(&self) -> &DynStore {
        &self.store
    }

    fn classify(&self, key: &[u8]) -> impl Fn(object_store::Error) -> RemoteStoreError + '_ {
        let key = String::from_utf8_lossy(key).into_owned();
        move |e| match e {
            object_store::Error::NotFound { .. } => RemoteStoreError::NotFound(key.clone()),
            source => RemoteStoreError::Backend {
                store: self.label.clone(),
                source,
            },
        }
    }
}

fn to_path(key: &[u8]) -> ObjPath {
    ObjPath::from(String::from_utf8_lossy(key).as_ref())
}

/// Invert the percent-encoding `ObjPath::from` applies to each segment.
fn decode_location(location: &ObjPath) -> Vec<u8> {
    let raw = location.as_ref().as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(raw[i + 1]), hex_digit(raw[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl Collection for RemoteStore {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn get(&self, key: &[u8]) -> StashResult<Vec<u8>> {
        self.get_record(key).map(|record| record.value)
    }

    fn get_record(&self, key: &[u8]) -> StashResult<StoredRecord> {
        let path = to_path(key);
        let classify = self.classify(key);
        let (value, content_type) = self.runtime.block_on(async {
            let result = self.store.get(&path).await.map_err(&classify)?;
            let content_type = result
                .attributes
                .get(&Attribute::ContentType)
                .map(|v| v.to_string());
            let bytes = result.bytes().await.map_err(&classify)?;
            Ok::<_, RemoteStoreError>((bytes.to_vec(), content_type))
        })?;
        Ok(StoredRecord::new(value, content_type))
    }

    fn put(&self, key: &[u8], value: &[u8], content_type: Option<&str>) -> StashResult<()> {
        let path = to_path(key);
        let payload = PutPayload::from_bytes(Bytes::copy_from_slice(value));
        let mut attributes = Attributes::new();
        if let (true, Some(ct)) = (self.supports_attributes, content_type) {
            attributes.insert(Attribute::ContentType, AttributeValue::from(ct.to_string()));
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        let classify = self.classify(key);
        self.runtime
            .block_on(self.store.put_opts(&path, payload, opts))
            .map_err(classify)?;
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StashResult<bool> {
        let path = to_path(key);
        match self.runtime.block_on(self.store.head(&path)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err((self.classify(key))(e).into()),
        }
    }

    fn delete(&self, key: &[u8]) -> StashResult<()> {
        let path = to_path(key);
        match self.runtime.block_on(self.store.delete(&path)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err((self.classify(key))(e).into()),
        }
    }

    fn content_length(&self, key: &[u8]) -> StashResult<u64> {
        let path = to_path(key);
        let meta = self
            .runtime
            .block_on(self.store.head(&path))
            .map_err(self.classify(key))?;
        Ok(meta.size as u64)
    }

    fn content_type(&self, key: &[u8]) -> StashResult<Option<String>> {
        let path = to_path(key);
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .runtime
            .block_on(self.store.get_opts(&path, options))
            .map_err(self.classify(key))?;
        Ok(result
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| v.to_string()))
    }

    fn iter_prefix(&self, start: &[u8], prefix: &[u8]) -> StashResult<KeyIter> {
        let prefix_text = String::from_utf8_lossy(prefix);
        let list_prefix = prefix_text
            .rsplit_once('/')
            .map(|(dir, _)| ObjPath::from(dir));
        Ok(Box::new(RemoteScan {
            store: Arc::clone(&self.store),
            runtime: Arc::clone(&self.runtime),
            label: self.label.clone(),
            list_prefix,
            prefix: prefix.to_vec(),
            cursor: Some(Bound::Included(start.to_vec())),
            page_size: self.page_size,
            sorted_listing: self.sorted_listing,
            buffer: VecDeque::new(),
        }))
    }

    fn public_uri(&self, key: &[u8]) -> StashResult<Url> {
        let key_text = String::from_utf8_lossy(key);
        match &self.public {
            PublicAccess::Private => Err(StorageError::unsupported(format!(
                "public_uri on private store {}",
                self.label
            ))
            .into()),
            PublicAccess::Bucket(bucket) => {
                Url::parse(&format!("https://{}/{}", bucket, key_text)).map_err(|e| {
                    StorageError::Remote {
                        store: self.label.clone(),
                        reason: format!("invalid public uri for {}: {}", key_text, e),
                    }
                    .into()
                })
            }
            PublicAccess::BaseUrl(base) => {
                let mut url = base.clone();
                url.path_segments_mut()
                    .map_err(|_| StorageError::unsupported(format!("public_uri under base {}", base)))?
                    .pop_if_empty()
                    .extend(key_text.split('/'));
                Ok(url)
            }
        }
    }
}

/// Lazy key listing, one `list_with_offset` request per page.
struct RemoteScan {
    store: DynStore,
    runtime: Arc<Runtime>,
    label: String,
    list_prefix: Option<ObjPath>,
    prefix: Vec<u8>,
    cursor: Option<Bound<Vec<u8>>>,
    page_size: usize,
    sorted_listing: bool,
    buffer: VecDeque<Vec<u8>>,
}

impl RemoteScan {
    fn fill(&mut self) -> Result<(), RemoteStoreError> {
        let Some(lower) = self.cursor.take() else {
            return Ok(());
        };
        let (after, include_start) = match &lower {
            Bound::Included(key) => (key.clone(), true),
            Bound::Excluded(key) => (key.clone(), false),
            Bound::Unbounded => (Vec::new(), false),
        };

        let store = Arc::clone(&self.store);
        let list_prefix = self.list_prefix.clone();
        let limit = if self.sorted_listing {
            self.page_size + 1
        } else {
            usize::MAX
        };

        let mut listed: Vec<Vec<u8>> = self
            .runtime
            .block_on(async move {
                let mut keys = Vec::new();
                if include_start && !after.is_empty() {
                    match store.head(&to_path(&after)).await {
                        Ok(_) => keys.push(after.clone()),
                        Err(object_store::Error::NotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                let offset = to_path(&after);
                let metas: Vec<object_store::ObjectMeta> = store
                    .list_with_offset(list_prefix.as_ref(), &offset)
                    .take(limit)
                    .try_collect()
                    .await?;
                keys.extend(metas.iter().map(|meta| decode_location(&meta.location)));
                Ok(keys)
            })
            .map_err(|source| RemoteStoreError::Backend {
                store: self.label.clone(),
                source,
            })?;

        if !self.sorted_listing {
            listed.sort();
            listed.dedup();
        }

        // Listings run in encoded-path order. The prefix range is contiguous
        // there, but escaped characters move keys, so each page is re-sorted
        // by raw bytes while the cursor stays on the last listed path.
        let mut page = Vec::new();
        let mut more = false;
        for key in listed {
            if !key.starts_with(&self.prefix) {
                break;
            }
            if self.sorted_listing && page.len() == self.page_size {
                more = true;
                break;
            }
            page.push(key);
        }

        if more {
            self.cursor = page.last().cloned().map(Bound::Excluded);
        }
        page.sort();
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for RemoteScan {
    type Item = StashResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill() {
                self.cursor = None;
                return Some(Err(e.into()));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn collect(iter: KeyIter) -> Vec<String> {
        iter.map(|k| String::from_utf8(k.expect("scan should succeed")).expect("utf8"))
            .collect()
    }

    #[test]
    fn test_memory_put_get_with_content_type() {
        let store = RemoteStore::memory().expect("memory store");
        store
            .put(b"fn_a", b"payload", Some("text/plain"))
            .expect("put should succeed");
        let record = store.get_record(b"fn_a").expect("get should succeed");
        assert_eq!(record.value, b"payload".to_vec());
        assert_eq!(record.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            store.content_type(b"fn_a").expect("content type").as_deref(),
            Some("text/plain")
        );
        assert_eq!(store.content_length(b"fn_a").expect("length"), 7);
    }

    #[test]
    fn test_memory_missing_is_not_found() {
        let store = RemoteStore::memory().expect("memory store");
        assert!(store.get(b"fn_nope").expect_err("missing").is_missing_key());
        assert!(store
            .content_length(b"fn_nope")
            .expect_err("missing")
            .is_missing_key());
        assert!(!store.contains(b"fn_nope").expect("contains"));
        store.delete(b"fn_nope").expect("deleting absent key is fine");
    }

    #[test]
    fn test_memory_iter_prefix_pages() {
        let store = RemoteStore::memory().expect("memory store").with_page_size(2);
        for key in ["a_1", "a_2", "a_3", "a_4", "a_5", "b_1"] {
            store.put(key.as_bytes(), b"v", None).expect("put");
        }
        assert_eq!(
            collect(store.iter_prefix(b"a_", b"a_").expect("scan")),
            vec!["a_1", "a_2", "a_3", "a_4", "a_5"]
        );
        assert_eq!(
            collect(store.iter_prefix(b"a_4", b"a_").expect("scan")),
            vec!["a_4", "a_5"]
        );
    }

    #[test]
    fn test_keys_with_reserved_characters_round_trip() {
        let store = RemoteStore::memory().expect("memory store");
        let key = br#"fn_{"a":10,"b":3}"#;
        store.put(key, b"v", None).expect("put");
        let keys = collect(store.iter_prefix(b"fn_", b"fn_").expect("scan"));
        assert_eq!(keys, vec![String::from_utf8_lossy(key).into_owned()]);
        assert_eq!(store.get(key).expect("get"), b"v".to_vec());
    }

    #[test]
    fn test_escaped_keys_page_in_byte_order() {
        let store = RemoteStore::memory().expect("memory store").with_page_size(3);
        let keys = [r#"fn_{"a":1}"#, "fn_a", "fn_b", "fn_%7", "fn_z"];
        for key in keys {
            store.put(key.as_bytes(), b"v", None).expect("put");
        }
        let listed = collect(store.iter_prefix(b"fn_", b"fn_").expect("scan"));
        let mut expected: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        expected.sort();
        let mut sorted_listed = listed.clone();
        sorted_listed.sort();
        assert_eq!(sorted_listed, expected);
        for page in listed.chunks(3) {
            assert!(page.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn test_file_system_store() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = RemoteStore::file_system(dir.path(), None).expect("fs store");
        for key in ["fn_c", "fn_a", "fn_b", "zz_1"] {
            store
                .put(key.as_bytes(), key.as_bytes(), Some("text/plain"))
                .expect("put");
        }
        assert_eq!(store.get(b"fn_b").expect("get"), b"fn_b".to_vec());
        assert_eq!(store.content_type(b"fn_b").expect("content type"), None);
        assert_eq!(
            collect(store.iter_prefix(b"fn_", b"fn_").expect("scan")),
            vec!["fn_a", "fn_b", "fn_c"]
        );
        assert!(store.public_uri(b"fn_a").expect_err("private").is_unsupported());
    }

    #[test]
    fn test_public_uris() {
        let bucket = RemoteStore::new(
            Arc::new(InMemory::new()),
            "memory",
            PublicAccess::Bucket("results.example.com".to_string()),
        )
        .expect("store");
        assert_eq!(
            bucket.public_uri(b"fn_abc").expect("uri").as_str(),
            "https://results.example.com/fn_abc"
        );

        let served = RemoteStore::new(
            Arc::new(InMemory::new()),
            "memory",
            PublicAccess::BaseUrl(Url::parse("http://cdn.local/objects/").expect("url")),
        )
        .expect("store");
        assert_eq!(
            served.public_uri(b"fn_abc").expect("uri").as_str(),
            "http://cdn.local/objects/fn_abc"
        );
    }

    #[test]
    fn test_decode_location() {
        let path = ObjPath::from("fn_{\"a\":1}");
        assert_eq!(decode_location(&path), b"fn_{\"a\":1}".to_vec());
        let literal = ObjPath::from("fn_100%");
        assert_eq!(decode_location(&literal), b"fn_100%".to_vec());
    }
}
