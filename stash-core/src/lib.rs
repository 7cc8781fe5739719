//! Core types for the stash memoization engine.
//!
//! Keys, feed entries, the argument model, fingerprinting strategies, value
//! codecs, configuration and the error taxonomy shared by every other crate.

pub mod args;
pub mod codec;
pub mod config;
pub mod content_type;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod key;

pub use args::{ArgValue, Args, DType, NumericArray};
pub use codec::{ArrayCodec, BytesCodec, Codec, JsonCodec};
pub use config::{
    check_identifier, check_partition_name, EmbeddedConfig, RemoteConfig, StashConfig,
};
pub use content_type::SupportedContentType;
pub use error::{
    CatalogError, CodecError, ConfigError, ExtractionError, FingerprintError, StashError,
    StashResult, StorageError,
};
pub use fingerprint::{ComputationDescriptor, ComputationFingerprint, ParamsFingerprint};
pub use ids::{CounterIds, IdGenerator, UuidV7Ids};
pub use key::{base_key, identifier_prefix, FeedEntry, Key, MetaData, StoredRecord, DEFAULT_DELIMITER};
