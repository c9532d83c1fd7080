use alloc::string::String;
use core::cmp::Ordering;

use crate::Crdt;

/// A last-writer-wins register (LWW-Register).
///
/// Each write carries a timestamp and the writer's identity. Merge keeps the
/// write with the larger timestamp; exact timestamp ties are broken by
/// comparing writer ids, and a tie on both by comparing values, so the
/// winner is the same whichever side merges.
///
/// Merge needs `T: PartialOrd`. The final tie-break is only total for
/// values that compare, so NaN is not a valid register value.
///
/// # Example
///
/// ```
/// use engram_crdt::prelude::*;
///
/// let mut r1 = LWWRegister::new("old", 1, "w1");
/// let mut r2 = LWWRegister::new("new", 2, "w2");
///
/// r1.merge(&r2);
/// assert_eq!(*r1.get(), "new");
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LWWRegister<T: Clone> {
    value: T,
    timestamp: u64,
    writer: String,
}

impl<T: Clone + Eq> Eq for LWWRegister<T> {}

impl<T: Clone> LWWRegister<T> {
    /// Create a register holding one write.
    pub fn new(value: T, timestamp: u64, writer: impl Into<String>) -> Self {
        Self {
            value,
            timestamp,
            writer: writer.into(),
        }
    }

    /// Overwrite the register unconditionally.
    ///
    /// This is a local write: the caller is responsible for supplying a
    /// timestamp that is later than anything it has written before.
    pub fn set(&mut self, value: T, timestamp: u64, writer: impl Into<String>) {
        self.value = value;
        self.timestamp = timestamp;
        self.writer = writer.into();
    }

    /// Get the current value.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Timestamp of the winning write.
    #[must_use]
    pub fn get_timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Writer of the winning write.
    #[must_use]
    pub fn get_writer(&self) -> &str {
        &self.writer
    }
}

impl<T: Clone + PartialOrd> LWWRegister<T> {
    /// True if `other`'s write beats this one.
    fn loses_to(&self, other: &Self) -> bool {
        let theirs = (other.timestamp, other.writer.as_str());
        match theirs.cmp(&(self.timestamp, self.writer.as_str())) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => other.value.partial_cmp(&self.value) == Some(Ordering::Greater),
        }
    }
}

impl<T: Clone + PartialOrd> Crdt for LWWRegister<T> {
    fn merge(&mut self, other: &Self) {
        if self.loses_to(other) {
            self.value = other.value.clone();
            self.timestamp = other.timestamp;
            self.writer.clone_from(&other.writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_register_holds_value() {
        let r = LWWRegister::new(42, 1, "a");
        assert_eq!(*r.get(), 42);
        assert_eq!(r.get_timestamp(), 1);
        assert_eq!(r.get_writer(), "a");
    }

    #[test]
    fn set_overwrites_unconditionally() {
        let mut r = LWWRegister::new(1, 10, "a");
        r.set(2, 5, "b");
        assert_eq!(*r.get(), 2);
        assert_eq!(r.get_timestamp(), 5);
        assert_eq!(r.get_writer(), "b");
    }

    #[test]
    fn merge_keeps_later_timestamp() {
        let mut reg1 = LWWRegister::new("old", 1, "w1");
        let reg2 = LWWRegister::new("new", 2, "w2");

        assert_eq!(*reg1.merged(&reg2).get(), "new");
        reg1.merge(&reg2);
        assert_eq!(*reg1.get(), "new");
    }

    #[test]
    fn merge_keeps_self_if_later() {
        let mut r1 = LWWRegister::new("new", 2, "a");
        let r2 = LWWRegister::new("old", 1, "b");

        r1.merge(&r2);
        assert_eq!(*r1.get(), "new");
        assert_eq!(r1.get_writer(), "a");
    }

    #[test]
    fn tie_is_broken_by_writer_in_both_directions() {
        let r1 = LWWRegister::new("first", 1, "a");
        let r2 = LWWRegister::new("second", 1, "b");

        let left = r1.merged(&r2);
        let right = r2.merged(&r1);
        assert_eq!(left, right);
        assert_eq!(*left.get(), "second");
    }

    #[test]
    fn same_stamp_and_writer_tie_is_broken_by_value() {
        let r1 = LWWRegister::new(0.2, 7, "a");
        let r2 = LWWRegister::new(0.8, 7, "a");

        let left = r1.merged(&r2);
        let right = r2.merged(&r1);
        assert_eq!(left, right);
        assert_eq!(*left.get(), 0.8);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut r1 = LWWRegister::new("x", 1, "a");
        let r2 = LWWRegister::new("y", 2, "b");

        r1.merge(&r2);
        let after_first = r1.clone();
        r1.merge(&r2);
        assert_eq!(r1, after_first);
    }
}
