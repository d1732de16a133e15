//! Interpreter counters
//!
//! Plain counters bumped on the dispatcher's hot paths and by the recovery
//! driver. They are per-context (no atomics): a context is only ever driven
//! by one thread at a time.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterpStats {
    /// Objects taken from the cursor and classified.
    pub dispatched: u64,
    /// Literals pushed by the dispatcher itself.
    pub literals: u64,
    /// Executable names resolved.
    pub name_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Calls through the operator table.
    pub operator_calls: u64,
    /// Special operators run on the inline path.
    pub fast_ops: u64,
    /// Procedures entered (including oparray bodies).
    pub proc_entries: u64,
    /// Time-slice checkpoints reached.
    pub slices: u64,
    pub collections: u64,
    pub objects_freed: u64,
    pub ostack_growths: u64,
    pub estack_growths: u64,
    pub dstack_growths: u64,
    /// Lower stack blocks brought back after an underflow.
    pub block_pops: u64,
    /// Language errors dispatched to an `errordict` handler.
    pub errors_handled: u64,
}

impl InterpStats {
    /// Add another context's counters into this one.
    pub fn merge(&mut self, other: &InterpStats) {
        self.dispatched += other.dispatched;
        self.literals += other.literals;
        self.name_lookups += other.name_lookups;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.operator_calls += other.operator_calls;
        self.fast_ops += other.fast_ops;
        self.proc_entries += other.proc_entries;
        self.slices += other.slices;
        self.collections += other.collections;
        self.objects_freed += other.objects_freed;
        self.ostack_growths += other.ostack_growths;
        self.estack_growths += other.estack_growths;
        self.dstack_growths += other.dstack_growths;
        self.block_pops += other.block_pops;
        self.errors_handled += other.errors_handled;
    }

    /// Fraction of name lookups answered by the inline cache.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.name_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.name_lookups as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_counters() {
        let mut a = InterpStats {
            dispatched: 3,
            collections: 1,
            ..Default::default()
        };
        let b = InterpStats {
            dispatched: 4,
            block_pops: 2,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.dispatched, 7);
        assert_eq!(a.collections, 1);
        assert_eq!(a.block_pops, 2);
    }

    #[test]
    fn test_cache_hit_rate() {
        let s = InterpStats {
            name_lookups: 4,
            cache_hits: 3,
            ..Default::default()
        };
        assert!((s.cache_hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(InterpStats::default().cache_hit_rate(), 0.0);
    }
}
