use std::error::Error;
use std::fmt;

use metric_tree::{Fallible, MetricTree, MetricTreeError, OraclePanic, VpTree};

#[derive(Debug, PartialEq)]
struct Poisoned(i64);

impl fmt::Display for Poisoned {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cannot measure poisoned value {}", self.0)
    }
}

impl Error for Poisoned {}

const POISON: i64 = 666;

fn checked(a: &i64, b: &i64) -> Result<f64, Poisoned> {
    for v in [a, b] {
        if *v == POISON {
            return Err(Poisoned(*v));
        }
    }
    Ok((a - b).abs() as f64)
}

fn checked_metric() -> Fallible<fn(&i64, &i64) -> Result<f64, Poisoned>> {
    Fallible(checked as fn(&i64, &i64) -> Result<f64, Poisoned>)
}

fn assert_poisoned(err: MetricTreeError) {
    match err {
        MetricTreeError::UnindexableObject { ref cause } => {
            assert_eq!(cause.downcast_ref::<Poisoned>(), Some(&Poisoned(POISON)));
        }
        ref other => panic!("expected UnindexableObject, got {:?}", other),
    }
    assert!(err.source().is_some());
}

#[test]
fn insert_is_unsupported() {
    let mut tree = VpTree::new(0..10i64, checked_metric()).unwrap();
    match tree.insert(11) {
        Err(MetricTreeError::Unsupported(op)) => assert_eq!(op, "insert"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(tree.size(), 10);

    let mut empty = VpTree::<i64, _>::empty(checked_metric());
    assert!(matches!(empty.insert(1), Err(MetricTreeError::Unsupported(_))));
}

#[test]
fn invalid_ranges_are_rejected() {
    let tree = VpTree::new(0..10i64, checked_metric()).unwrap();
    assert!(matches!(
        tree.range_search(&3, 2.0, 1.0),
        Err(MetricTreeError::InvalidRange { .. })
    ));
    assert!(matches!(
        tree.range_search(&3, -1.0, 1.0),
        Err(MetricTreeError::InvalidRange { .. })
    ));
    assert!(matches!(
        tree.search(&3, f64::NAN),
        Err(MetricTreeError::InvalidRange { .. })
    ));
    // Rejected before the poisoned query ever reaches the oracle.
    assert!(matches!(
        tree.range_search(&POISON, 5.0, 4.0),
        Err(MetricTreeError::InvalidRange { .. })
    ));
    assert_eq!(tree.range_search(&3, 1.0, 1.0).unwrap().len(), 2);
}

#[test]
fn construct_fails_on_oracle_error() {
    let objects: Vec<i64> = (0..40).chain(Some(POISON)).chain(40..80).collect();
    let err = VpTree::new(objects, checked_metric()).unwrap_err();
    assert_poisoned(err);
}

#[test]
fn construct_fails_while_sampling_vantage_points() {
    // More than 15 objects, poison inside the 5 sampled first.
    let objects: Vec<i64> = (0..3).chain(Some(POISON)).chain(3..40).collect();
    assert_eq!(objects[3], POISON);
    let err = VpTree::new(objects, checked_metric()).unwrap_err();
    assert_poisoned(err);
}

#[test]
fn failed_construct_keeps_previous_tree() {
    let mut tree = VpTree::new(0..20i64, checked_metric()).unwrap();
    let before: Vec<i64> = tree.values().cloned().collect();
    let stats = tree.last_build_stats();

    let err = tree
        .construct(vec![1, 2, POISON, 3], checked_metric())
        .unwrap_err();
    assert_poisoned(err);

    assert_eq!(tree.size(), 20);
    assert_eq!(tree.values().cloned().collect::<Vec<_>>(), before);
    assert_eq!(tree.last_build_stats(), stats);
    let hits = tree.search(&5, 1.0).unwrap();
    let found: Vec<i64> = hits.iter().map(|n| *n.item).collect();
    assert_eq!(found[0], 5);
    assert_eq!(found.len(), 3);
}

#[test]
fn search_fails_on_oracle_error() {
    let tree = VpTree::new(0..50i64, checked_metric()).unwrap();
    assert_poisoned(tree.search(&POISON, 10.0).unwrap_err());
    assert_poisoned(tree.contains(&POISON).unwrap_err());
    assert_poisoned(tree.nearest_neighbors(&POISON, 3).unwrap_err());
}

#[test]
fn panicking_oracle_is_reported() {
    fn fragile(a: &i64, b: &i64) -> f64 {
        if *a == POISON || *b == POISON {
            panic!("fragile metric touched poison");
        }
        (a - b).abs() as f64
    }

    let err = VpTree::new(vec![1, POISON, 3], fragile).unwrap_err();
    match err {
        MetricTreeError::UnindexableObject { cause } => {
            let panic = cause.downcast_ref::<OraclePanic>().unwrap();
            assert!(panic.0.contains("poison"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn negative_distances_are_reported() {
    let err = VpTree::new(vec![3i64, 2, 1], |a: &i64, b: &i64| (a - b) as f64).unwrap_err();
    assert!(matches!(err, MetricTreeError::UnindexableObject { .. }));
}
