//! Per-orchestrator hit/miss counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of an orchestrator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    /// Calls answered from the store.
    pub hits: u64,
    /// Calls that found no stored value.
    pub misses: u64,
    /// Times the wrapped computation ran.
    pub computations: u64,
}

impl MemoStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn computed(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = MemoStats {
            hits: 3,
            misses: 1,
            computations: 1,
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
        assert!((MemoStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counter_snapshot() {
        let counter = StatsCounter::default();
        counter.miss();
        counter.computed();
        counter.hit();
        counter.hit();
        assert_eq!(
            counter.snapshot(),
            MemoStats {
                hits: 2,
                misses: 1,
                computations: 1
            }
        );
    }
}
