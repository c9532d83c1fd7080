use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::Crdt;

/// A grow-only set (G-Set).
///
/// Elements can be added but never removed. Merge is the union of both
/// sets. Documents use it for relationship links, which only accumulate.
///
/// # Example
///
/// ```
/// use engram_crdt::prelude::*;
///
/// let mut s1 = GSet::new();
/// s1.add("a");
/// s1.add("b");
///
/// let mut s2 = GSet::new();
/// s2.add("b");
/// s2.add("c");
///
/// s1.merge(&s2);
/// assert_eq!(s1.len(), 3);
/// assert!(s1.contains(&"c"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GSet<T: Ord + Clone> {
    elements: BTreeSet<T>,
}

impl<T: Ord + Clone> GSet<T> {
    /// Create a new empty G-Set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: BTreeSet::new(),
        }
    }

    /// Add an element. Adding an element twice is a no-op.
    ///
    /// Returns `true` if the element was newly inserted.
    pub fn add(&mut self, value: T) -> bool {
        self.elements.insert(value)
    }

    /// Check if the set contains an element.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.elements.contains(value)
    }

    /// Snapshot of the elements in ascending order.
    #[must_use]
    pub fn elements(&self) -> Vec<T> {
        self.elements.iter().cloned().collect()
    }

    /// Get the number of elements in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate over the elements in the set.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }
}

impl<T: Ord + Clone> Default for GSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> Crdt for GSet<T> {
    fn merge(&mut self, other: &Self) {
        for elem in &other.elements {
            if !self.elements.contains(elem) {
                self.elements.insert(elem.clone());
            }
        }
    }
}

impl<T: Ord + Clone> FromIterator<T> for GSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            elements: BTreeSet::from_iter(iter),
        }
    }
}
