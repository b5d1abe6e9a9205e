//! Seen-set of broadcast values
//!
//! Grows monotonically and never shrinks. Insert-and-test is a single atomic
//! step, so concurrent handlers agree on which one saw a value first.

use dashmap::DashSet;

/// Concurrent set of observed values
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: DashSet<i64>,
}

impl DedupSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`; `true` if it was not present before
    pub fn observe(&self, value: i64) -> bool {
        self.seen.insert(value)
    }

    /// Insert every value; returns how many were new
    pub fn extend(&self, values: impl IntoIterator<Item = i64>) -> usize {
        values
            .into_iter()
            .filter(|value| self.seen.insert(*value))
            .count()
    }

    /// Whether `value` has been observed
    pub fn contains(&self, value: i64) -> bool {
        self.seen.contains(&value)
    }

    /// Number of distinct values observed
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been observed yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// All observed values, in no particular order.
    ///
    /// Not a point-in-time view: values inserted while the snapshot is taken
    /// may or may not appear.
    pub fn snapshot(&self) -> Vec<i64> {
        self.seen.iter().map(|value| *value).collect()
    }
}
