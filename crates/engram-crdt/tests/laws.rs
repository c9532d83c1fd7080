//! Property tests: documents edited independently on several replicas
//! converge no matter how their states are merged.

use proptest::prelude::*;

use engram_crdt::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    SetContent(u8),
    AddTag(u8),
    RemoveTag(u8),
    SetImportance(f64),
    SetConfidence(f64),
    Reclassify(u8),
    Relate(u8),
    Derive(u8),
    Cite(u8),
    Access,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::SetContent),
        (0u8..5).prop_map(Op::AddTag),
        (0u8..5).prop_map(Op::RemoveTag),
        (0.0f64..1.0).prop_map(Op::SetImportance),
        (0.0f64..1.0).prop_map(Op::SetConfidence),
        (0u8..4).prop_map(Op::Reclassify),
        (0u8..5).prop_map(Op::Relate),
        (0u8..3).prop_map(Op::Derive),
        (0u8..3).prop_map(Op::Cite),
        Just(Op::Access),
    ]
}

fn apply(doc: &mut MemoryDocument, ops: &[Op], writer: &str) {
    for op in ops {
        match op {
            Op::SetContent(n) => doc.set_content(format!("content-{n}"), writer),
            Op::AddTag(n) => {
                doc.add_tag(format!("tag-{n}"), writer);
            }
            Op::RemoveTag(n) => {
                doc.remove_tag(&format!("tag-{n}"), writer);
            }
            Op::SetImportance(v) => doc.set_importance(*v, writer).unwrap(),
            Op::SetConfidence(v) => doc.set_confidence(*v, writer).unwrap(),
            Op::Reclassify(n) => doc.reclassify(MemoryType::ALL[*n as usize], writer),
            Op::Relate(n) => doc.add_related(format!("m{n}"), writer),
            Op::Derive(n) => doc.add_parent(format!("p{n}"), writer),
            Op::Cite(n) => doc.add_evidence(format!("e{n}"), writer),
            Op::Access => doc.record_access(writer),
        }
    }
}

fn gset(items: &[u8]) -> GSet<u8> {
    items.iter().copied().collect()
}

fn clock(entries: &[(u8, u64)]) -> VectorClock {
    let mut vc = VectorClock::new();
    for (r, n) in entries {
        vc.set(&format!("r{r}"), *n);
    }
    vc
}

fn base() -> MemoryDocument {
    let mut doc = MemoryDocument::with_timestamp("m", "seed", MemoryType::Episodic, "origin", 1);
    doc.add_tag("seeded", "origin");
    doc.set_importance(0.25, "origin").unwrap();
    doc
}

/// Three replicas forked from a shared base, each edited by its own writer.
fn replicas() -> impl Strategy<Value = (MemoryDocument, MemoryDocument, MemoryDocument)> {
    let ops = || prop::collection::vec(op_strategy(), 0..12);
    (ops(), ops(), ops()).prop_map(|(oa, ob, oc)| {
        let mut a = base();
        let mut b = base();
        let mut c = base();
        apply(&mut a, &oa, "r-a");
        apply(&mut b, &ob, "r-b");
        apply(&mut c, &oc, "r-c");
        (a, b, c)
    })
}

proptest! {
    #[test]
    fn merge_is_commutative((a, b, _) in replicas()) {
        prop_assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
    }

    #[test]
    fn merge_is_associative((a, b, c) in replicas()) {
        let left = a.merge(&b).unwrap().merge(&c).unwrap();
        let right = a.merge(&b.merge(&c).unwrap()).unwrap();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn merge_is_idempotent((a, b, _) in replicas()) {
        prop_assert_eq!(a.merge(&a).unwrap(), a.clone());
        let ab = a.merge(&b).unwrap();
        prop_assert_eq!(ab.merge(&b).unwrap(), ab);
    }

    #[test]
    fn merge_never_lowers_importance_across_writers((a, b, _) in replicas()) {
        let merged = a.merge(&b).unwrap();
        prop_assert!(merged.importance() >= a.importance());
        prop_assert!(merged.importance() >= b.importance());
    }

    #[test]
    fn merge_keeps_every_access((a, b, _) in replicas()) {
        let merged = a.merge(&b).unwrap();
        // Both replicas share the base's accesses, which is zero.
        prop_assert_eq!(merged.access_count(), a.access_count() + b.access_count());
    }

    #[test]
    fn merged_clock_dominates_inputs((a, b, _) in replicas()) {
        let merged = a.merge(&b).unwrap();
        prop_assert!(matches!(
            a.causal_relation(&merged),
            CausalOrder::Before | CausalOrder::Equal
        ));
        prop_assert!(matches!(
            b.causal_relation(&merged),
            CausalOrder::Before | CausalOrder::Equal
        ));
    }

    #[test]
    fn fresh_tags_survive_other_replicas((a, b, _) in replicas(), n in 0u8..5) {
        let mut a = a;
        let tag = format!("fresh-{n}");
        a.add_tag(tag.clone(), "r-a");
        let merged = a.merge(&b).unwrap();
        prop_assert!(merged.has_tag(&tag));
    }

    #[test]
    fn gcounter_merge_laws(xs in prop::collection::vec((0u8..4, 0u64..100), 0..20),
                           ys in prop::collection::vec((0u8..4, 0u64..100), 0..20)) {
        let build = |ops: &[(u8, u64)]| {
            let mut c = GCounter::new();
            for (r, n) in ops {
                c.increment_by(&format!("r{r}"), *n);
            }
            c
        };
        let (x, y) = (build(&xs), build(&ys));
        prop_assert_eq!(x.merged(&y), y.merged(&x));
        prop_assert_eq!(x.merged(&x), x.clone());
        prop_assert!(x.merged(&y).value() >= x.value());
    }

    #[test]
    fn gset_merge_laws(xs in prop::collection::vec(0u8..16, 0..12),
                       ys in prop::collection::vec(0u8..16, 0..12),
                       zs in prop::collection::vec(0u8..16, 0..12)) {
        let (x, y, z) = (gset(&xs), gset(&ys), gset(&zs));
        prop_assert_eq!(x.merged(&y), y.merged(&x));
        prop_assert_eq!(x.merged(&y).merged(&z), x.merged(&y.merged(&z)));
        prop_assert_eq!(x.merged(&x), x.clone());
        let joined = x.merged(&y);
        prop_assert!(xs.iter().chain(&ys).all(|v| joined.contains(v)));
    }

    #[test]
    fn vector_clock_merge_laws(xs in prop::collection::vec((0u8..4, 0u64..10), 0..10),
                               ys in prop::collection::vec((0u8..4, 0u64..10), 0..10),
                               zs in prop::collection::vec((0u8..4, 0u64..10), 0..10)) {
        let (x, y, z) = (clock(&xs), clock(&ys), clock(&zs));
        let joined = x.merged(&y);
        prop_assert_eq!(joined.clone(), y.merged(&x));
        prop_assert_eq!(joined.merged(&z), x.merged(&y.merged(&z)));
        prop_assert_eq!(x.merged(&x), x.clone());
        prop_assert!(!joined.happened_before(&x));
        prop_assert!(!joined.happened_before(&y));
    }

    #[test]
    fn happened_before_is_antisymmetric(xs in prop::collection::vec((0u8..3, 0u64..4), 0..6),
                                        ys in prop::collection::vec((0u8..3, 0u64..4), 0..6)) {
        let (x, y) = (clock(&xs), clock(&ys));
        prop_assert!(!(x.happened_before(&y) && y.happened_before(&x)));
        let neither = !x.happened_before(&y) && !y.happened_before(&x);
        prop_assert_eq!(x.concurrent(&y), neither && x != y);
        prop_assert_eq!(x.concurrent(&y), y.concurrent(&x));
    }
}
