use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::Crdt;

/// A grow-only counter (G-Counter).
///
/// Each replica owns one slot and only ever bumps its own. The total value
/// is the sum of all slots; merge keeps the pointwise maximum.
///
/// # Example
///
/// ```
/// use engram_crdt::prelude::*;
///
/// let mut c1 = GCounter::new();
/// c1.increment("node-1");
/// c1.increment("node-1");
///
/// let mut c2 = GCounter::new();
/// c2.increment("node-2");
///
/// c1.merge(&c2);
/// assert_eq!(c1.value(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct GCounter {
    counts: BTreeMap<String, u64>,
}

impl GCounter {
    /// Create a counter with every slot at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump `replica`'s slot by 1.
    pub fn increment(&mut self, replica: &str) {
        self.increment_by(replica, 1);
    }

    /// Bump `replica`'s slot by `n`.
    pub fn increment_by(&mut self, replica: &str, n: u64) {
        match self.counts.get_mut(replica) {
            Some(slot) => *slot = slot.saturating_add(n),
            None => {
                self.counts.insert(String::from(replica), n);
            }
        }
    }

    /// Total across all replicas.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Get the count for a specific replica.
    #[must_use]
    pub fn count_for(&self, replica: &str) -> u64 {
        self.counts.get(replica).copied().unwrap_or(0)
    }
}

impl Crdt for GCounter {
    fn merge(&mut self, other: &Self) {
        for (replica, &count) in &other.counts {
            let entry = self.counts.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }
}
