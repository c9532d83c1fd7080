//! Vector clocks for causal ordering between replicas.
//!
//! A vector clock maps each replica to the number of events it has
//! produced. Keys that are absent are implicitly zero, so `{a: 1}` and
//! `{a: 1, b: 0}` describe the same clock.
//!
//! # Example
//!
//! ```
//! use engram_crdt::VectorClock;
//!
//! let mut vc1 = VectorClock::new();
//! vc1.set("a", 1);
//! vc1.set("b", 2);
//!
//! let mut vc2 = VectorClock::new();
//! vc2.set("a", 2);
//! vc2.set("b", 3);
//!
//! assert!(vc1.happened_before(&vc2));
//! assert!(!vc2.happened_before(&vc1));
//! ```

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::Crdt;

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// `self` happened before `other`.
    Before,
    /// `other` happened before `self`.
    After,
    /// Both clocks are identical.
    Equal,
    /// Neither clock dominates the other.
    Concurrent,
}

/// Mapping replica id -> event count.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }
}

impl Eq for VectorClock {}

impl VectorClock {
    /// An all-zero clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more event for `replica` and return its new count.
    pub fn tick(&mut self, replica: &str) -> u64 {
        match self.entries.get_mut(replica) {
            Some(n) => {
                *n = n.saturating_add(1);
                *n
            }
            None => {
                self.entries.insert(String::from(replica), 1);
                1
            }
        }
    }

    /// Current count for `replica`, or 0 if never seen.
    #[must_use]
    pub fn get(&self, replica: &str) -> u64 {
        self.entries.get(replica).copied().unwrap_or(0)
    }

    /// Import an observed count for `replica`.
    ///
    /// This is an explicit overwrite, used when loading a clock observed
    /// elsewhere. Regular causal bookkeeping goes through
    /// [`tick`](Self::tick) and [`merge`](Crdt::merge), which never regress.
    pub fn set(&mut self, replica: &str, value: u64) {
        if value == 0 {
            self.entries.remove(replica);
        } else {
            self.entries.insert(String::from(replica), value);
        }
    }

    /// True iff every entry of `self` is `<=` the matching entry of `other`
    /// and at least one is strictly less.
    #[must_use]
    pub fn happened_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// True iff neither clock happened before the other and they differ.
    #[must_use]
    pub fn concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Full causal comparison of `self` against `other`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut less = false;
        let mut greater = false;

        for (replica, &mine) in &self.entries {
            let theirs = other.get(replica);
            if mine < theirs {
                less = true;
            } else if mine > theirs {
                greater = true;
            }
        }
        for (replica, &theirs) in &other.entries {
            if !self.entries.contains_key(replica) && theirs > 0 {
                less = true;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Iterate over the non-zero entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(r, n)| (r.as_str(), *n))
    }
}

impl Crdt for VectorClock {
    fn merge(&mut self, other: &Self) {
        for (replica, &count) in &other.entries {
            let entry = self.entries.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }
}
