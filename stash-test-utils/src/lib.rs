//! stash Test Utilities
//!
//! Shared test infrastructure for the stash workspace:
//! - Proptest generators for arguments and stored values
//! - Mock tiers and call counters
//! - Temp-dir store fixtures
//! - Assertions over `StashResult`

pub use stash_core::{
    ArgValue, Args, DType, EmbeddedConfig, FeedEntry, Key, NumericArray, StashConfig, StashError,
    StashResult, StorageError, StoredRecord,
};
pub use stash_storage::{Collection, EmbeddedStore, FeedStore, KeyIter, RemoteStore, TieredStore};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCKS
// ============================================================================

/// Counts invocations of a wrapped computation across clones.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return the count before it.
    pub fn tick(&self) -> usize {
        self.calls.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A remote tier whose writes always fail and whose reads always miss.
#[derive(Debug, Clone, Default)]
pub struct UnreachableRemote;

impl Collection for UnreachableRemote {
    fn describe(&self) -> String {
        "unreachable".to_string()
    }

    fn get(&self, key: &[u8]) -> StashResult<Vec<u8>> {
        Err(StorageError::not_found(key).into())
    }

    fn get_record(&self, key: &[u8]) -> StashResult<StoredRecord> {
        Err(StorageError::not_found(key).into())
    }

    fn put(&self, _key: &[u8], _value: &[u8], _content_type: Option<&str>) -> StashResult<()> {
        Err(StorageError::Remote {
            store: self.describe(),
            reason: "connection refused".to_string(),
        }
        .into())
    }

    fn contains(&self, _key: &[u8]) -> StashResult<bool> {
        Ok(false)
    }

    fn delete(&self, _key: &[u8]) -> StashResult<()> {
        Ok(())
    }

    fn content_length(&self, key: &[u8]) -> StashResult<u64> {
        Err(StorageError::not_found(key).into())
    }

    fn content_type(&self, key: &[u8]) -> StashResult<Option<String>> {
        Err(StorageError::not_found(key).into())
    }

    fn iter_prefix(&self, _start: &[u8], _prefix: &[u8]) -> StashResult<KeyIter> {
        Ok(Box::new(std::iter::empty()))
    }

    fn public_uri(&self, _key: &[u8]) -> StashResult<url::Url> {
        Err(StorageError::unsupported("public_uri").into())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for arguments and values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Generate a JSON leaf (no floats, so equality is exact).
    pub fn arb_json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Generate a nested JSON document.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_json_leaf().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    /// Generate a small i64 matrix.
    pub fn arb_numeric_array() -> impl Strategy<Value = NumericArray> {
        (1usize..4, 1usize..4).prop_flat_map(|(rows, cols)| {
            prop::collection::vec(any::<i64>(), rows * cols).prop_map(move |values| {
                NumericArray::from_i64(vec![rows, cols], &values)
                    .unwrap_or_else(|_| NumericArray::from(Vec::<i64>::new()))
            })
        })
    }

    /// Generate one argument of any supported kind.
    pub fn arb_arg_value() -> impl Strategy<Value = ArgValue> {
        prop_oneof![
            arb_json().prop_map(ArgValue::Json),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(ArgValue::Bytes),
            arb_numeric_array().prop_map(ArgValue::Array),
        ]
    }

    /// Generate a full argument set.
    pub fn arb_args() -> impl Strategy<Value = Args> {
        (
            prop::collection::vec(arb_arg_value(), 0..3),
            prop::collection::btree_map("[a-z]{1,6}", arb_arg_value(), 0..3),
        )
            .prop_map(|(positional, keyword)| {
                let args = positional.into_iter().fold(Args::new(), Args::arg);
                keyword
                    .into_iter()
                    .fold(args, |args, (name, value)| args.kwarg(name, value))
            })
    }

    /// Generate keyword-only arguments with JSON values.
    pub fn arb_json_kwargs() -> impl Strategy<Value = Args> {
        prop::collection::btree_map("[a-z]{1,6}", arb_json(), 0..4).prop_map(|keyword| {
            keyword
                .into_iter()
                .fold(Args::new(), |args, (name, value)| args.kwarg(name, value))
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Temp-dir backed stores.

    use super::*;
    use tempfile::TempDir;

    /// An embedded store that lives as long as its temp dir.
    pub struct TempStore {
        pub dir: TempDir,
        pub store: EmbeddedStore,
    }

    impl TempStore {
        /// The store behind a shared trait object.
        pub fn shared(&self) -> Arc<dyn FeedStore> {
            Arc::new(self.store.clone())
        }
    }

    /// Small embedded config rooted at `dir`.
    pub fn embedded_config(dir: &TempDir) -> EmbeddedConfig {
        EmbeddedConfig {
            path: dir.path().to_path_buf(),
            map_size_mb: 32,
            ..Default::default()
        }
    }

    /// Open a fresh embedded store with the default delimiter.
    pub fn temp_store() -> TempStore {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = EmbeddedStore::open(&embedded_config(&dir), stash_core::DEFAULT_DELIMITER)
            .expect("Failed to open embedded store");
        TempStore { dir, store }
    }

    /// A tiered store over a fresh embedded store and an in-memory remote.
    pub fn temp_tiered() -> (TempStore, Arc<RemoteStore>, Arc<dyn FeedStore>) {
        let local = temp_store();
        let remote = Arc::new(RemoteStore::memory().expect("Failed to create memory store"));
        let tiered: Arc<dyn FeedStore> = Arc::new(TieredStore::new(
            local.store.clone(),
            Arc::clone(&remote) as Arc<dyn Collection>,
        ));
        (local, remote, tiered)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over `StashResult`.

    use super::*;

    /// Assert that a StashResult is a missing-key storage error.
    #[track_caller]
    pub fn assert_missing_key<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(e) if e.is_missing_key() => {}
            other => panic!("Expected missing key, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a configuration error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a tier inconsistency.
    #[track_caller]
    pub fn assert_tier_inconsistency<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Storage(StorageError::TierInconsistency { .. })) => {}
            other => panic!("Expected TierInconsistency, got: {:?}", other),
        }
    }
}
