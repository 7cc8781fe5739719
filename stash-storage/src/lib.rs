//! Storage tiers for stash.
//!
//! - [`EmbeddedStore`]: LMDB partitions with an append-only feed and offsets
//! - [`RemoteStore`]: any `object_store` backend (S3, filesystem, memory)
//! - [`TieredStore`]: local-first composition of the two

pub mod embedded;
pub mod remote;
mod scan;
pub mod tiered;
pub mod traits;

pub use embedded::{BaseKeyExtractor, EmbeddedStore, EmbeddedStoreError};
pub use remote::{DynStore, PublicAccess, RemoteStore, RemoteStoreError};
pub use tiered::{open_store, TieredStore};
pub use traits::{Collection, FeedIter, FeedStore, KeyIter};
