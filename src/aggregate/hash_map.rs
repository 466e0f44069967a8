use super::{check_value_column, contribution, AggregateFunction};
use crate::hash_index::{AggregateIndex, HashIndex, Key, KeyExtractor, KeyKind, Position};
use crate::scheduler::{BuildTask, TaskScheduler};
use crate::table::{split_rows, Table, TableRange};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupSlot {
    value: i64,
    /// Smallest position that contributed to the group
    representative: Position,
}

/// Single-threaded group-by aggregate index.
///
/// Built per partition without any shared state, then combined with
/// [`merge`](Self::merge). Each group also remembers a representative row so
/// the group-by columns can be materialised later.
#[derive(Debug, Clone)]
pub struct AggregateHashMap {
    groups: HashMap<Key, GroupSlot>,
    extractor: KeyExtractor,
    function: Arc<dyn AggregateFunction>,
}

impl AggregateHashMap {
    pub fn new(extractor: KeyExtractor, function: Arc<dyn AggregateFunction>) -> Self {
        Self {
            groups: HashMap::new(),
            extractor,
            function,
        }
    }

    pub fn build(
        table: &dyn Table,
        extractor: KeyExtractor,
        value_column: usize,
        function: Arc<dyn AggregateFunction>,
    ) -> Result<Self> {
        extractor.check_columns(table)?;
        check_value_column(function.as_ref(), table, value_column)?;

        let mut map = Self::new(extractor, function);
        let offset = table.base_offset();
        for row in 0..table.row_count() {
            if let Some(value) = contribution(map.function.as_ref(), table, value_column, row) {
                let key = map.extractor.extract(table, row);
                map.accumulate(key, value, row + offset);
            }
        }
        Ok(map)
    }

    fn accumulate(&mut self, key: Key, value: i64, position: Position) {
        let function = self.function.as_ref();
        self.groups
            .entry(key)
            .and_modify(|slot| {
                function.accumulate(&mut slot.value, value);
                slot.representative = slot.representative.min(position);
            })
            .or_insert_with(|| GroupSlot {
                value: function.initial_value(value),
                representative: position,
            });
    }

    /// Fold another partition's final aggregates into this one.
    pub fn merge_with(&mut self, other: &AggregateHashMap) -> Result<()> {
        if self.function.name() != other.function.name() {
            return Err(Error::Config(format!(
                "can not merge {} aggregates into {} aggregates",
                other.function.name(),
                self.function.name()
            )));
        }
        if self.extractor.kind() != other.extractor.kind()
            || self.extractor.columns().len() != other.extractor.columns().len()
        {
            return Err(Error::KeyMismatch {
                expected: self.extractor.columns().len(),
                actual: other.extractor.columns().len(),
            });
        }

        let function = self.function.as_ref();
        for (key, partial) in &other.groups {
            self.groups
                .entry(key.clone())
                .and_modify(|slot| {
                    function.combine(&mut slot.value, partial.value);
                    slot.representative = slot.representative.min(partial.representative);
                })
                .or_insert(*partial);
        }
        Ok(())
    }

    /// Combine several partition maps into a new one.
    pub fn merge(maps: &[Arc<AggregateHashMap>]) -> Result<Self> {
        let (first, rest) = maps
            .split_first()
            .ok_or_else(|| Error::Config("merge needs at least one aggregate map".to_string()))?;
        let mut merged = first.as_ref().clone();
        for other in rest {
            merged.merge_with(other)?;
        }
        debug!(inputs = maps.len(), groups = merged.groups.len(), "Aggregate maps merged");
        Ok(merged)
    }

    /// Aggregate each of `workers` ranges independently, then merge.
    pub fn build_partitioned(
        table: Arc<dyn Table>,
        extractor: KeyExtractor,
        value_column: usize,
        function: Arc<dyn AggregateFunction>,
        workers: usize,
        scheduler: &dyn TaskScheduler,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("aggregate build needs at least one worker".to_string()));
        }
        extractor.check_columns(table.as_ref())?;
        check_value_column(function.as_ref(), table.as_ref(), value_column)?;

        let start = Instant::now();
        let mut ranges = Vec::with_capacity(workers);
        for rows in split_rows(table.row_count(), workers) {
            ranges.push(TableRange::new(table.clone(), rows)?);
        }
        let partials: Mutex<Vec<(usize, Arc<AggregateHashMap>)>> = Mutex::new(Vec::new());
        let tasks: Vec<BuildTask<'_>> = ranges
            .iter()
            .enumerate()
            .map(|(part, range)| {
                let (partials, extractor, function) = (&partials, &extractor, &function);
                Box::new(move || {
                    let map = AggregateHashMap::build(
                        range,
                        extractor.clone(),
                        value_column,
                        function.clone(),
                    )?;
                    partials.lock().push((part, Arc::new(map)));
                    Ok(())
                }) as BuildTask<'_>
            })
            .collect();
        scheduler.run_to_completion(tasks)?;

        let mut partials = partials.into_inner();
        partials.sort_by_key(|(part, _)| *part);
        let maps: Vec<_> = partials.into_iter().map(|(_, map)| map).collect();
        let merged = Self::merge(&maps)?;
        crate::log_build!(
            "partitioned_aggregate",
            table.row_count(),
            workers,
            merged.groups.len(),
            start.elapsed()
        );
        Ok(merged)
    }

    /// Smallest row position of the group holding `key`.
    pub fn representative(&self, key: &Key) -> Option<Position> {
        self.groups.get(key).map(|slot| slot.representative)
    }

    pub fn function(&self) -> &Arc<dyn AggregateFunction> {
        &self.function
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl HashIndex for AggregateHashMap {
    fn key_kind(&self) -> KeyKind {
        self.extractor.kind()
    }

    fn fields(&self) -> &[usize] {
        self.extractor.columns()
    }

    fn size(&self) -> usize {
        self.groups.len()
    }

    fn num_distinct_keys(&self) -> u64 {
        self.groups.len() as u64
    }
}

impl AggregateIndex for AggregateHashMap {
    fn aggregate(&self, key: &Key) -> Option<i64> {
        self.groups.get(key).map(|slot| slot.value)
    }

    fn aggregates(&self) -> Vec<(Key, i64)> {
        self.groups
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateRegistry, Count, Sum};
    use crate::scheduler::RayonScheduler;
    use crate::table::ColumnarTable;

    fn orders() -> Arc<dyn Table> {
        Arc::new(
            ColumnarTable::from_i64_columns(&[
                ("customer", vec![7, 8, 7, 9, 8, 7]),
                ("total", vec![100, 40, 60, 5, 10, 1]),
            ])
            .unwrap(),
        )
    }

    fn group_by() -> KeyExtractor {
        KeyExtractor::new(KeyKind::GroupBy, vec![0]).unwrap()
    }

    fn sorted(map: &AggregateHashMap) -> Vec<(Key, i64)> {
        let mut aggregates = map.aggregates();
        aggregates.sort();
        aggregates
    }

    #[test]
    fn test_build_sum_and_representatives() {
        let table = orders();
        let map = AggregateHashMap::build(table.as_ref(), group_by(), 1, Arc::new(Sum)).unwrap();
        // Value ids: 7 -> 0, 8 -> 1, 9 -> 2.
        assert_eq!(
            sorted(&map),
            vec![(Key::Single(0), 161), (Key::Single(1), 50), (Key::Single(2), 5)]
        );
        assert_eq!(map.representative(&Key::Single(1)), Some(1));
        assert_eq!(map.num_distinct_keys(), 3);
    }

    #[test]
    fn test_merge_of_halves_equals_whole() {
        let table = orders();
        let registry = AggregateRegistry::with_builtins();
        for name in ["SUM", "COUNT", "MIN", "MAX"] {
            let function = registry.lookup(name).unwrap();
            let whole =
                AggregateHashMap::build(table.as_ref(), group_by(), 1, function.clone()).unwrap();
            let first = TableRange::new(table.clone(), 0..3).unwrap();
            let second = TableRange::new(table.clone(), 3..6).unwrap();
            let a = AggregateHashMap::build(&first, group_by(), 1, function.clone()).unwrap();
            let b = AggregateHashMap::build(&second, group_by(), 1, function.clone()).unwrap();
            let merged = AggregateHashMap::merge(&[Arc::new(a), Arc::new(b)]).unwrap();
            assert_eq!(sorted(&merged), sorted(&whole), "{}", name);
            assert_eq!(merged.representative(&Key::Single(2)), Some(3));
        }
    }

    #[test]
    fn test_partitioned_build_matches_single() {
        let table = orders();
        let whole = AggregateHashMap::build(table.as_ref(), group_by(), 1, Arc::new(Count)).unwrap();
        let scheduler = RayonScheduler::new(2).unwrap();
        let partitioned =
            AggregateHashMap::build_partitioned(table, group_by(), 1, Arc::new(Count), 4, &scheduler)
                .unwrap();
        assert_eq!(sorted(&partitioned), sorted(&whole));
    }

    #[test]
    fn test_merge_rejects_different_functions() {
        let table = orders();
        let sum = AggregateHashMap::build(table.as_ref(), group_by(), 1, Arc::new(Sum)).unwrap();
        let count = AggregateHashMap::build(table.as_ref(), group_by(), 1, Arc::new(Count)).unwrap();
        assert!(AggregateHashMap::merge(&[Arc::new(sum), Arc::new(count)]).is_err());
        assert!(AggregateHashMap::merge(&[]).is_err());
    }
}
