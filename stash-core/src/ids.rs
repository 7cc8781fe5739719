//! Monotonic, lexically sortable id generation for feed keys.
//!
//! Ids are 32 lowercase hex digits, so lexical order equals numeric order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

/// Width of every generated id, in hex digits.
pub const ID_WIDTH: usize = 32;

/// Source of time-ordered unique ids.
pub trait IdGenerator: Send + Sync {
    /// A fresh id, greater than every id this generator returned before.
    fn next_id(&self) -> String;
}

/// The smallest id strictly greater than `previous`, if `previous` is a
/// well-formed id.
pub fn successor(previous: &str) -> Option<String> {
    if previous.len() != ID_WIDTH {
        return None;
    }
    let value = u128::from_str_radix(previous, 16).ok()?;
    value.checked_add(1).map(format_id)
}

fn format_id(value: u128) -> String {
    format!("{:032x}", value)
}

/// UUIDv7 ids: millisecond timestamp prefix plus random tail.
///
/// UUIDv7 alone is only ordered to the millisecond across threads; the last
/// issued value is tracked so ids from one generator strictly increase.
#[derive(Debug, Default)]
pub struct UuidV7Ids {
    last: Mutex<u128>,
}

impl UuidV7Ids {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for UuidV7Ids {
    fn next_id(&self) -> String {
        let candidate = Uuid::now_v7().as_u128();
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = if candidate > *last {
            candidate
        } else {
            last.saturating_add(1)
        };
        *last = next;
        format_id(next)
    }
}

/// Plain counter ids. Deterministic, for tests and replay tooling.
#[derive(Debug, Default)]
pub struct CounterIds {
    next: AtomicU64,
}

impl CounterIds {
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl IdGenerator for CounterIds {
    fn next_id(&self) -> String {
        format_id(u128::from(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}
