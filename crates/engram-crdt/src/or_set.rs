use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::Crdt;

/// Unique marker for one add event: the replica that performed the add and
/// that replica's sequence number for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    /// Replica that performed the add.
    pub replica: String,
    /// Per-replica monotonic sequence number.
    pub seq: u64,
}

impl Tag {
    /// Build a tag from its parts.
    pub fn new(replica: impl Into<String>, seq: u64) -> Self {
        Self {
            replica: replica.into(),
            seq,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.replica, self.seq)
    }
}

/// An observed-remove set (OR-Set) with add-wins semantics.
///
/// State is two explicit collections: the add events (element plus the
/// [`Tag`] of each add) and the tombstones (tags that have been removed).
/// An element is present iff at least one of its add tags is not
/// tombstoned. Merge unions both collections, so an add whose tag a
/// concurrent remover never observed survives the merge.
///
/// Removal is precise: [`remove`](ORSet::remove) retires only the tags the
/// caller passes in, and only if this replica has actually observed them.
///
/// The owner only names the replica that [`add`](ORSet::add) tags for. It
/// is local to this copy: merge never changes it, equality ignores it, and
/// it is not serialized, so two replicas holding the same adds and
/// tombstones encode identically.
///
/// # Example
///
/// ```
/// use engram_crdt::prelude::*;
///
/// let mut s1 = ORSet::new("instance-1");
/// let mut s2 = ORSet::new("instance-2");
///
/// let tag1 = s1.add("shared");
/// s2.add("shared");
///
/// // instance-1 removes only the add it observed
/// s1.remove(&"shared", &[tag1]);
/// assert!(!s1.contains(&"shared"));
///
/// // instance-2's concurrent add survives the merge
/// s1.merge(&s2);
/// assert!(s1.contains(&"shared"));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ORSet<T: Ord + Clone> {
    #[cfg_attr(feature = "serde", serde(skip))]
    owner: String,
    adds: BTreeMap<T, BTreeSet<Tag>>,
    tombstones: BTreeSet<Tag>,
}

impl<T: Ord + Clone> PartialEq for ORSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.adds == other.adds && self.tombstones == other.tombstones
    }
}

impl<T: Ord + Clone> Eq for ORSet<T> {}

impl<T: Ord + Clone> ORSet<T> {
    /// Create an empty set owned by `owner`. Adds made through
    /// [`add`](ORSet::add) are tagged with this id.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            adds: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    /// Add an element on behalf of the owning instance.
    ///
    /// Returns the freshly allocated tag so the caller can later remove
    /// exactly this add.
    pub fn add(&mut self, value: T) -> Tag {
        let owner = self.owner.clone();
        self.add_as(value, &owner)
    }

    /// Add an element on behalf of `replica`.
    ///
    /// The sequence number is one past the highest sequence this set has
    /// observed for `replica`, so a replica never reuses one of its own
    /// tags within a document's history.
    pub fn add_as(&mut self, value: T, replica: &str) -> Tag {
        self.add_at(value, replica, 0)
    }

    /// Add an element on behalf of `replica` with a sequence number of at
    /// least `floor`.
    ///
    /// Copies of a set built independently cannot see each other's
    /// sequences. Passing a clock reading as the floor keeps a fresh copy
    /// from reissuing a tag that another copy has already tombstoned.
    pub fn add_at(&mut self, value: T, replica: &str, floor: u64) -> Tag {
        let seq = (self.last_seq(replica) + 1).max(floor);
        let tag = Tag::new(replica, seq);
        self.adds.entry(value).or_default().insert(tag.clone());
        tag
    }

    /// Retire the given tags for `value`.
    ///
    /// Only tags recorded as adds of `value` in this replica's state are
    /// moved into the tombstones; anything else is ignored, never
    /// fabricated. Returns the number of tags newly retired.
    pub fn remove(&mut self, value: &T, tags: &[Tag]) -> usize {
        let Some(observed) = self.adds.get(value) else {
            return 0;
        };
        let mut retired = 0;
        for tag in tags {
            if observed.contains(tag) && self.tombstones.insert(tag.clone()) {
                retired += 1;
            }
        }
        retired
    }

    /// Retire every live tag this replica has observed for `value`.
    pub fn remove_observed(&mut self, value: &T) -> usize {
        let live = self.tags_for(value);
        self.remove(value, &live)
    }

    /// True iff some add tag for `value` is not tombstoned.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.adds
            .get(value)
            .is_some_and(|tags| tags.iter().any(|t| !self.tombstones.contains(t)))
    }

    /// The live (non-tombstoned) tags observed for `value`.
    #[must_use]
    pub fn tags_for(&self, value: &T) -> Vec<Tag> {
        self.adds
            .get(value)
            .map(|tags| {
                tags.iter()
                    .filter(|t| !self.tombstones.contains(t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate over the live elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.adds
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| !self.tombstones.contains(t)))
            .map(|(v, _)| v)
    }

    /// Snapshot of the live elements.
    #[must_use]
    pub fn elements(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if no element is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the instance that owns this set.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Number of retired tags held.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Drop add records whose tags are all tombstoned.
    ///
    /// Tombstones themselves are kept: a peer that still holds the dropped
    /// add will re-send it on merge, and the tombstone keeps it retired.
    /// Returns the number of add tags dropped.
    pub fn compact(&mut self) -> usize {
        let mut dropped = 0;
        for tags in self.adds.values_mut() {
            let before = tags.len();
            tags.retain(|t| !self.tombstones.contains(t));
            dropped += before - tags.len();
        }
        self.adds.retain(|_, tags| !tags.is_empty());
        dropped
    }

    /// Highest sequence observed for `replica`. Compaction keeps every
    /// tombstone, so this never moves backwards.
    fn last_seq(&self, replica: &str) -> u64 {
        self.adds
            .values()
            .flatten()
            .chain(self.tombstones.iter())
            .filter(|t| t.replica == replica)
            .map(|t| t.seq)
            .max()
            .unwrap_or(0)
    }
}

impl<T: Ord + Clone> Crdt for ORSet<T> {
    fn merge(&mut self, other: &Self) {
        for (value, other_tags) in &other.adds {
            let tags = self.adds.entry(value.clone()).or_default();
            for tag in other_tags {
                if !tags.contains(tag) {
                    tags.insert(tag.clone());
                }
            }
        }
        for tag in &other.tombstones {
            if !self.tombstones.contains(tag) {
                self.tombstones.insert(tag.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn new_set_is_empty() {
        let s = ORSet::<String>::new("a");
        assert!(s.is_empty());
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn add_allocates_monotonic_tags() {
        let mut s = ORSet::new("a");
        let t1 = s.add("x");
        let t2 = s.add("x");
        let t3 = s.add("y");
        assert_eq!(t1, Tag::new("a", 1));
        assert_eq!(t2, Tag::new("a", 2));
        assert_eq!(t3, Tag::new("a", 3));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn remove_with_exact_tag() {
        let mut s = ORSet::new("a");
        let tag = s.add("x");
        assert_eq!(s.remove(&"x", &[tag]), 1);
        assert!(!s.contains(&"x"));
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn remove_keeps_element_with_other_live_tags() {
        let mut s = ORSet::new("a");
        let t1 = s.add("x");
        let _t2 = s.add("x");
        s.remove(&"x", &[t1]);
        assert!(s.contains(&"x"));
        assert_eq!(s.tags_for(&"x"), vec![Tag::new("a", 2)]);
    }

    #[test]
    fn unseen_tags_are_ignored() {
        let mut s = ORSet::new("a");
        s.add("x");
        assert_eq!(s.remove(&"x", &[Tag::new("b", 1)]), 0);
        assert_eq!(s.remove(&"y", &[Tag::new("a", 1)]), 0);
        assert!(s.contains(&"x"));
        assert_eq!(s.tombstone_count(), 0);
    }

    #[test]
    fn tag_of_another_element_cannot_remove() {
        let mut s = ORSet::new("a");
        let tx = s.add("x");
        s.add("y");
        assert_eq!(s.remove(&"y", &[tx]), 0);
        assert!(s.contains(&"x"));
    }

    #[test]
    fn can_readd_after_remove() {
        let mut s = ORSet::new("a");
        s.add("x");
        s.remove_observed(&"x");
        assert!(!s.contains(&"x"));

        let tag = s.add("x");
        assert_eq!(tag.seq, 2);
        assert!(s.contains(&"x"));
    }

    #[test]
    fn concurrent_add_survives_remove() {
        let mut s1 = ORSet::new("instance1");
        let mut s2 = ORSet::new("instance2");

        let tag1 = s1.add("shared");
        s2.add("shared");
        s1.remove(&"shared", &[tag1]);

        assert!(s1.merged(&s2).contains(&"shared"));
        assert!(s2.merged(&s1).contains(&"shared"));
    }

    #[test]
    fn observed_remove_propagates() {
        let mut s1 = ORSet::new("a");
        s1.add("x");

        let mut s2 = ORSet::new("b");
        s2.merge(&s1);
        s2.remove_observed(&"x");

        s1.merge(&s2);
        assert!(!s1.contains(&"x"));
    }

    #[test]
    fn merge_is_commutative() {
        let mut s1 = ORSet::new("a");
        s1.add("x");
        s1.add("y");

        let mut s2 = ORSet::new("b");
        s2.add("y");
        s2.add("z");

        assert_eq!(s1.merged(&s2), s2.merged(&s1));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut s1 = ORSet::new("a");
        s1.add("x");

        let mut s2 = ORSet::new("b");
        s2.add("y");

        s1.merge(&s2);
        let after_first = s1.clone();
        s1.merge(&s2);
        assert_eq!(s1, after_first);
    }

    #[test]
    fn add_as_does_not_reuse_a_merged_sequence() {
        let mut s1 = ORSet::new("a");
        s1.add_as("x", "c");

        let mut s2 = ORSet::new("b");
        s2.merge(&s1);
        let tag = s2.add_as("y", "c");
        assert_eq!(tag, Tag::new("c", 2));
    }

    #[test]
    fn add_at_respects_floor() {
        let mut s = ORSet::new("a");
        assert_eq!(s.add_at("x", "a", 500), Tag::new("a", 500));
        assert_eq!(s.add_at("y", "a", 10), Tag::new("a", 501));
    }

    #[test]
    fn fresh_copy_with_floor_escapes_old_tombstone() {
        let mut old = ORSet::new("a");
        let t = old.add_at("old", "a", 100);
        old.remove(&"old", &[t]);

        let mut fresh = ORSet::new("a");
        fresh.add_at("new", "a", 200);
        old.merge(&fresh);
        assert!(old.contains(&"new"));
    }

    #[test]
    fn owner_does_not_affect_equality() {
        let mut s1 = ORSet::new("a");
        s1.add_as("x", "c");
        let mut s2 = ORSet::new("b");
        s2.merge(&s1);
        assert_eq!(s1, s2);
        assert_eq!(s2.owner(), "b");
    }

    #[test]
    fn compact_drops_retired_adds_but_keeps_tombstones() {
        let mut s = ORSet::new("a");
        let tx = s.add("x");
        s.add("y");
        s.remove(&"x", &[tx.clone()]);

        assert_eq!(s.compact(), 1);
        assert_eq!(s.tombstone_count(), 1);
        assert_eq!(s.elements(), vec!["y"]);

        let mut stale = ORSet::new("b");
        stale.adds.entry("x").or_default().insert(tx);
        s.merge(&stale);
        assert!(!s.contains(&"x"));
    }

    #[test]
    fn elements_are_sorted_and_live_only() {
        let mut s = ORSet::new("a");
        s.add(3);
        s.add(1);
        let t = s.add(2);
        s.remove(&2, &[t]);
        assert_eq!(s.elements(), vec![1, 3]);
    }
}
