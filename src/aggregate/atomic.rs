//! Group-by aggregation into one shared map by concurrent build tasks.
//!
//! Each key maps to an `AtomicI64`. The first contribution for a key inserts
//! the function's initial value; every later one folds in place through the
//! function's atomic `update`. No lock is held around the fold.

use super::{check_value_column, contribution, AggregateFunction};
use crate::hash_index::{AggregateIndex, HashIndex, Key, KeyExtractor, KeyKind};
use crate::scheduler::{BuildTask, TaskScheduler};
use crate::table::{split_rows, Table, TableRange};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Shared key to aggregate map.
#[derive(Debug, Default)]
pub struct AtomicAggregateMap {
    map: DashMap<Key, AtomicI64>,
}

impl AtomicAggregateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-update: try the existing slot under a shard read lock first and
    /// only take the entry (write) path for keys not seen yet.
    pub fn fold(&self, key: Key, value: i64, function: &dyn AggregateFunction) {
        if let Some(existing) = self.map.get(&key) {
            function.update(existing.value(), value);
            return;
        }
        match self.map.entry(key) {
            Entry::Occupied(existing) => function.update(existing.get(), value),
            Entry::Vacant(slot) => {
                slot.insert(AtomicI64::new(function.initial_value(value)));
            }
        }
    }

    pub fn get(&self, key: &Key) -> Option<i64> {
        self.map.get(key).map(|value| value.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(Key, i64)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Acquire)))
            .collect()
    }
}

/// One aggregation task over a slice of the input.
#[derive(Clone)]
pub struct AtomicAggregateBuild {
    input: Arc<dyn Table>,
    extractor: KeyExtractor,
    value_column: usize,
    function: Arc<dyn AggregateFunction>,
    map: Option<Arc<AtomicAggregateMap>>,
}

impl AtomicAggregateBuild {
    pub fn new(
        input: Arc<dyn Table>,
        extractor: KeyExtractor,
        value_column: usize,
        function: Arc<dyn AggregateFunction>,
    ) -> Result<Self> {
        extractor.check_columns(input.as_ref())?;
        check_value_column(function.as_ref(), input.as_ref(), value_column)?;
        Ok(Self {
            input,
            extractor,
            value_column,
            function,
            map: None,
        })
    }

    pub fn with_map(mut self, map: Arc<AtomicAggregateMap>) -> Self {
        self.map = Some(map);
        self
    }

    pub fn execute(&self) -> Result<()> {
        let map = self.map.as_ref().ok_or(Error::MissingMap)?;
        let table = self.input.as_ref();
        let function = self.function.as_ref();
        let mut folded = 0usize;
        for row in 0..table.row_count() {
            if let Some(value) = contribution(function, table, self.value_column, row) {
                map.fold(self.extractor.extract(table, row), value, function);
                folded += 1;
            }
        }
        trace!(
            rows = table.row_count(),
            folded,
            function = function.name(),
            "Aggregate task finished"
        );
        Ok(())
    }
}

impl fmt::Debug for AtomicAggregateBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicAggregateBuild")
            .field("rows", &self.input.row_count())
            .field("fields", &self.extractor.columns())
            .field("value_column", &self.value_column)
            .field("function", &self.function.name())
            .field("has_map", &self.map.is_some())
            .finish()
    }
}

/// Completed concurrent aggregate index.
#[derive(Debug, Clone)]
pub struct AtomicAggregateTable {
    map: Arc<AtomicAggregateMap>,
    extractor: KeyExtractor,
    function: Arc<dyn AggregateFunction>,
}

impl AtomicAggregateTable {
    pub fn new(
        map: Arc<AtomicAggregateMap>,
        extractor: KeyExtractor,
        function: Arc<dyn AggregateFunction>,
    ) -> Self {
        Self {
            map,
            extractor,
            function,
        }
    }

    /// Split `table` into `workers` ranges, aggregate them concurrently into one
    /// map and seal it once every task finished.
    pub fn build_parallel(
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
        let start = Instant::now();
        let map = Arc::new(AtomicAggregateMap::new());
        let mut builds = Vec::with_capacity(workers);
        for rows in split_rows(table.row_count(), workers) {
            let range: Arc<dyn Table> = Arc::new(TableRange::new(table.clone(), rows)?);
            builds.push(
                AtomicAggregateBuild::new(range, extractor.clone(), value_column, function.clone())?
                    .with_map(map.clone()),
            );
        }

        let tasks: Vec<BuildTask<'_>> = builds
            .iter()
            .map(|build| Box::new(move || build.execute()) as BuildTask<'_>)
            .collect();
        scheduler.run_to_completion(tasks)?;

        crate::log_build!(
            "atomic_aggregate",
            table.row_count(),
            workers,
            map.len(),
            start.elapsed()
        );
        Ok(Self::new(map, extractor, function))
    }

    pub fn function(&self) -> &Arc<dyn AggregateFunction> {
        &self.function
    }
}

impl HashIndex for AtomicAggregateTable {
    fn key_kind(&self) -> KeyKind {
        self.extractor.kind()
    }

    fn fields(&self) -> &[usize] {
        self.extractor.columns()
    }

    fn size(&self) -> usize {
        self.map.len()
    }

    fn num_distinct_keys(&self) -> u64 {
        // One entry per key.
        self.map.len() as u64
    }
}

impl AggregateIndex for AtomicAggregateTable {
    fn aggregate(&self, key: &Key) -> Option<i64> {
        self.map.get(key)
    }

    fn aggregates(&self) -> Vec<(Key, i64)> {
        debug!(keys = self.map.len(), "Snapshotting atomic aggregates");
        self.map.snapshot()
    }
}
