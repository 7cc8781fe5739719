//! Error types for stash operations

use thiserror::Error;

/// Storage layer errors, shared by every tier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Remote store {store} failed: {reason}")]
    Remote { store: String, reason: String },

    #[error("Tiers inconsistent for {key}: local write succeeded, remote write failed: {reason}")]
    TierInconsistency { key: String, reason: String },

    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("Partition {partition} has no feed")]
    FeedDisabled { partition: String },

    #[error("Offset {offset} does not belong to identifier {identifier}")]
    InvalidOffset { offset: String, identifier: String },
}

impl StorageError {
    /// Build a `NotFound` from raw key bytes.
    pub fn not_found(key: &[u8]) -> Self {
        StorageError::NotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Build an `Unsupported` for the named operation.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        StorageError::Unsupported {
            operation: operation.into(),
        }
    }
}

/// Errors raised while deriving fingerprints.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Argument is not serializable: {reason}")]
    NotSerializable { reason: String },

    #[error("JSON parameter fingerprints accept keyword arguments only, got {count} positional")]
    PositionalArgumentsRejected { count: usize },

    #[error("Keyword argument {name} has no JSON representation")]
    NotJson { name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Identifier {identifier} contains the reserved key delimiter {delimiter:?}")]
    DelimiterCollision { identifier: String, delimiter: char },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Serialization errors from the value codecs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{codec} encode failed: {reason}")]
    Encode { codec: &'static str, reason: String },

    #[error("{codec} decode failed: {reason}")]
    Decode { codec: &'static str, reason: String },
}

/// A single malformed index document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Document extracted for sub-key {sub_key} has no `key` field")]
    MissingKeyField { sub_key: String },

    #[error("Invalid document for sub-key {sub_key}: {reason}")]
    InvalidDocument { sub_key: String, reason: String },
}

/// Lookup failures at the catalog boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown function: {identifier}")]
    UnknownFunction { identifier: String },

    #[error("Unknown index {index} for function {identifier}")]
    UnknownIndex { identifier: String, index: String },
}

/// Master error type for all stash errors.
#[derive(Debug, Clone, Error)]
pub enum StashError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Computation failed: {reason}")]
    Computation { reason: String },
}

impl StashError {
    /// Wrap a failure raised by a user computation.
    pub fn computation(reason: impl std::fmt::Display) -> Self {
        StashError::Computation {
            reason: reason.to_string(),
        }
    }

    /// True for the "expected absence" family: missing keys and unknown
    /// catalog entries.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StashError::Storage(StorageError::NotFound { .. }) | StashError::Catalog(_)
        )
    }

    /// True when the error is a missing key in a store tier.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, StashError::Storage(StorageError::NotFound { .. }))
    }

    /// True when the operation is not supported by the tier.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StashError::Storage(StorageError::Unsupported { .. }))
    }
}

/// Result type alias for stash operations.
pub type StashResult<T> = Result<T, StashError>;

// =============================================================================
// TESTS
// =============================================================================
