use hash_exec::{ColumnarTable, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Table of named `Int64` columns
pub fn int_table(columns: &[(&str, Vec<i64>)]) -> Arc<dyn Table> {
    Arc::new(ColumnarTable::from_i64_columns(columns).unwrap())
}

/// Columns `k0..k{key_columns}` drawn from `0..keys`, plus a `value` column.
pub fn random_table(rows: usize, key_columns: usize, keys: i64, seed: u64) -> Arc<dyn Table> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut columns: Vec<(String, Vec<i64>)> = (0..key_columns)
        .map(|c| {
            let values = (0..rows).map(|_| rng.random_range(0..keys)).collect();
            (format!("k{}", c), values)
        })
        .collect();
    let values = (0..rows).map(|_| rng.random_range(-500..500)).collect();
    columns.push(("value".to_string(), values));

    let named: Vec<(&str, Vec<i64>)> = columns
        .iter()
        .map(|(name, values)| (name.as_str(), values.clone()))
        .collect();
    int_table(&named)
}

pub fn sorted<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    items.sort();
    items
}
