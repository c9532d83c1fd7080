/// Core trait implemented by every CRDT in this crate.
///
/// A CRDT (Conflict-free Replicated Data Type) guarantees that concurrent
/// updates on different replicas converge to the same state after merging,
/// without requiring coordination.
///
/// # Properties
///
/// All implementations must satisfy the join-semilattice laws:
/// - **Commutativity:** `a.merge(b) == b.merge(a)`
/// - **Associativity:** `a.merge(b.merge(c)) == a.merge(b).merge(c)`
/// - **Idempotency:** `a.merge(a) == a`
pub trait Crdt {
    /// Merge another replica's state into this one.
    ///
    /// After merging, `self` holds the least upper bound of both states.
    fn merge(&mut self, other: &Self);

    /// Pure variant of [`Crdt::merge`]: returns the join of `self` and
    /// `other` without touching either operand.
    #[must_use]
    fn merged(&self, other: &Self) -> Self
    where
        Self: Clone,
    {
        let mut out = self.clone();
        out.merge(other);
        out
    }
}
