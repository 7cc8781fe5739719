//! Memoizing orchestrator for stash.
//!
//! [`Memo`] wraps a computation: it derives a key per call, serves stored
//! values, and on a miss computes, stores through the configured
//! [`FeedStore`](stash_storage::FeedStore) and notifies write listeners.

pub mod builder;
pub mod function;
pub mod listener;
pub mod memo;
pub mod stats;

pub use builder::MemoBuilder;
pub use function::CachedFunction;
pub use listener::{Listener, ListenerId, WriteNotification};
pub use memo::{ComputationFn, KeysIter, Memo, ReadHook};
pub use stats::MemoStats;
