//! Secondary indexes for stash.
//!
//! An [`IndexEngine`] consumes one orchestrator's writes, either live through
//! a write listener or by catching up on the feed, and stores extracted
//! documents in its own partition for ranked prefix search.

pub mod engine;
pub mod ranking;
pub mod search;

pub use engine::{index_key, Extractor, IndexEngine};
pub use ranking::{document_key, rank, RankedDocument};
pub use search::SearchIndex;
