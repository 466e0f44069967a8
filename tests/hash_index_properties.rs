mod common;

use common::{int_table, sorted};
use hash_exec::{HashIndex, HashTable, KeyExtractor, KeyKind, PositionIndex, Table, TableRange};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn two_column_table(a: Vec<i64>, b: Vec<i64>) -> Arc<dyn Table> {
    int_table(&[("a", a), ("b", b)])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_build_is_reflexive_and_symmetric(
        rows in vec((0i64..6, 0i64..3), 1..80),
        composite in any::<bool>(),
        kind in prop_oneof![Just(KeyKind::GroupBy), Just(KeyKind::Join)],
    ) {
        let (a, b): (Vec<i64>, Vec<i64>) = rows.iter().cloned().unzip();
        let table = two_column_table(a, b);
        let fields = if composite { vec![0, 1] } else { vec![0] };
        let index = HashTable::build(table.clone(), fields.clone(), kind).unwrap();
        prop_assert_eq!(index.size(), rows.len());

        for r1 in 0..rows.len() {
            let found = index.get_row(table.as_ref(), &fields, r1).unwrap();
            prop_assert!(found.contains(&r1));
            for &r2 in &found {
                let back = index.get_row(table.as_ref(), &fields, r2).unwrap();
                prop_assert!(back.contains(&r1));
            }
        }
    }

    #[test]
    fn prop_distinct_keys_match_unique_values(rows in vec((0i64..8, 0i64..4), 0..120)) {
        let (a, b): (Vec<i64>, Vec<i64>) = rows.iter().cloned().unzip();
        let expected: HashSet<_> = rows.iter().cloned().collect();
        let table = two_column_table(a, b);
        let index = HashTable::build(table, vec![0, 1], KeyKind::GroupBy).unwrap();
        prop_assert_eq!(index.num_distinct_keys(), expected.len() as u64);
    }

    #[test]
    fn prop_views_are_additive_and_aligned(
        keys in vec(0i64..10, 1..100),
        mut splits in vec(0usize..14, 3),
    ) {
        splits.sort();
        let (a, b, c) = (splits[0], splits[1], splits[2]);
        let table = int_table(&[("k", keys)]);
        let index = Arc::new(HashTable::build(table, vec![0], KeyKind::GroupBy).unwrap());

        let left = index.view(a, b).unwrap();
        let right = index.view(b, c).unwrap();
        let whole = index.view(a, c).unwrap();
        prop_assert_eq!(left.size() + right.size(), whole.size());
        prop_assert_eq!(
            left.num_distinct_keys() + right.num_distinct_keys(),
            whole.num_distinct_keys()
        );

        // Every key a view returns comes back with all of its positions.
        for (key, _) in left.entries() {
            prop_assert_eq!(sorted(left.get(key)), sorted(index.get(key)));
            prop_assert!(right.get(key).is_empty());
        }
    }

    #[test]
    fn prop_merge_of_ranges_equals_whole(keys in vec(0i64..12, 2..100), cut in 0usize..100) {
        let cut = cut % keys.len();
        let table = int_table(&[("k", keys.clone())]);
        let whole = HashTable::build(table.clone(), vec![0], KeyKind::Join).unwrap();

        let head: Arc<dyn Table> = Arc::new(TableRange::new(table.clone(), 0..cut).unwrap());
        let tail: Arc<dyn Table> = Arc::new(TableRange::new(table.clone(), cut..keys.len()).unwrap());
        let merged = HashTable::merge(&[
            Arc::new(HashTable::build(head, vec![0], KeyKind::Join).unwrap()),
            Arc::new(HashTable::build(tail, vec![0], KeyKind::Join).unwrap()),
        ])
        .unwrap();

        prop_assert_eq!(merged.size(), whole.size());
        prop_assert_eq!(merged.num_distinct_keys(), whole.num_distinct_keys());
        let extractor = KeyExtractor::new(KeyKind::Join, vec![0]).unwrap();
        for row in 0..keys.len() {
            let key = extractor.extract(table.as_ref(), row);
            prop_assert_eq!(sorted(merged.get(&key)), sorted(whole.get(&key)));
        }
    }
}

#[test]
fn test_probe_with_other_table_columns() {
    let build = int_table(&[("id", vec![10, 20, 10]), ("pad", vec![0, 0, 0])]);
    let probe = int_table(&[("pad", vec![1, 1]), ("ref", vec![10, 30])]);
    let index = HashTable::build(build, vec![0], KeyKind::Join).unwrap();

    assert_eq!(sorted(index.get_row(probe.as_ref(), &[1], 0).unwrap()), vec![0, 2]);
    assert!(index.get_row(probe.as_ref(), &[1], 1).unwrap().is_empty());
    assert!(index.get_row(probe.as_ref(), &[4], 0).is_err());
}
