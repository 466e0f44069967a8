//! Hash index filled concurrently by many build tasks.
//!
//! All tasks share one map through an `Arc`. The map is either internally
//! synchronised ([`LockFreeMultiMap`]) or a plain map behind a mutex taken per
//! insert ([`LockedMultiMap`]). Reads are only valid once every task finished.

use super::{DistinctKeyCache, HashIndex, Key, KeyExtractor, KeyKind, Position, PositionIndex, PositionList};
use crate::scheduler::{BuildTask, TaskScheduler};
use crate::table::{split_rows, Table, TableRange};
use crate::{Error, Result};
use crossbeam::utils::CachePadded;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// How concurrent inserts into a shared map are synchronised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MapStrategy {
    #[default]
    #[serde(rename = "lockfree")]
    LockFree,
    #[serde(rename = "locked")]
    Locked,
}

impl MapStrategy {
    pub fn create_map(self) -> Arc<dyn ConcurrentMultiMap> {
        match self {
            MapStrategy::LockFree => Arc::new(LockFreeMultiMap::new()),
            MapStrategy::Locked => Arc::new(LockedMultiMap::new()),
        }
    }
}

impl fmt::Display for MapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapStrategy::LockFree => write!(f, "lockfree"),
            MapStrategy::Locked => write!(f, "locked"),
        }
    }
}

/// Multi-valued map safe to insert into from many threads at once.
pub trait ConcurrentMultiMap: Send + Sync + fmt::Debug {
    fn insert(&self, key: Key, position: Position);

    fn get(&self, key: &Key) -> PositionList;

    /// Total entries across all keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct keys, counted by one pass over the key groups.
    fn num_keys(&self) -> u64;

    /// Every key with its positions, in no particular order.
    fn snapshot(&self) -> Vec<(Key, PositionList)>;

    fn strategy(&self) -> MapStrategy;
}

/// Sharded concurrent multimap; callers never lock.
#[derive(Debug, Default)]
pub struct LockFreeMultiMap {
    map: DashMap<Key, SmallVec<[Position; 4]>>,
    entries: CachePadded<AtomicUsize>,
}

impl LockFreeMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity(capacity),
            entries: CachePadded::new(AtomicUsize::new(0)),
        }
    }
}

impl ConcurrentMultiMap for LockFreeMultiMap {
    fn insert(&self, key: Key, position: Position) {
        self.map.entry(key).or_default().push(position);
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, key: &Key) -> PositionList {
        self.map
            .get(key)
            .map(|positions| positions.to_vec())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }

    fn num_keys(&self) -> u64 {
        self.map.iter().filter(|group| !group.is_empty()).count() as u64
    }

    fn snapshot(&self) -> Vec<(Key, PositionList)> {
        self.map
            .iter()
            .map(|group| (group.key().clone(), group.value().to_vec()))
            .collect()
    }

    fn strategy(&self) -> MapStrategy {
        MapStrategy::LockFree
    }
}

/// Plain hash map behind one mutex, held for a single insert at a time.
#[derive(Debug, Default)]
pub struct LockedMultiMap {
    map: Mutex<HashMap<Key, Vec<Position>>>,
}

impl LockedMultiMap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConcurrentMultiMap for LockedMultiMap {
    fn insert(&self, key: Key, position: Position) {
        self.map.lock().entry(key).or_default().push(position);
    }

    fn get(&self, key: &Key) -> PositionList {
        self.map.lock().get(key).cloned().unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.map.lock().values().map(Vec::len).sum()
    }

    fn num_keys(&self) -> u64 {
        self.map.lock().len() as u64
    }

    fn snapshot(&self) -> Vec<(Key, PositionList)> {
        self.map
            .lock()
            .iter()
            .map(|(key, positions)| (key.clone(), positions.clone()))
            .collect()
    }

    fn strategy(&self) -> MapStrategy {
        MapStrategy::Locked
    }
}

/// One build task: hashes every row of its input slice into the shared map.
#[derive(Debug, Clone)]
pub struct SharedHashBuild {
    input: Arc<dyn Table>,
    extractor: KeyExtractor,
    map: Option<Arc<dyn ConcurrentMultiMap>>,
    row_offset: usize,
}

impl SharedHashBuild {
    /// Positions default to the input's own base offset.
    pub fn new(input: Arc<dyn Table>, extractor: KeyExtractor) -> Result<Self> {
        extractor.check_columns(input.as_ref())?;
        let row_offset = input.base_offset();
        Ok(Self {
            input,
            extractor,
            map: None,
            row_offset,
        })
    }

    pub fn with_map(mut self, map: Arc<dyn ConcurrentMultiMap>) -> Self {
        self.map = Some(map);
        self
    }

    /// Override the offset added to every emitted position.
    pub fn with_row_offset(mut self, row_offset: usize) -> Self {
        self.row_offset = row_offset;
        self
    }

    pub fn execute(&self) -> Result<()> {
        let map = self.map.as_ref().ok_or(Error::MissingMap)?;
        let rows = self.input.row_count();
        self.row_offset
            .checked_add(rows)
            .ok_or(Error::PositionOverflow)?;

        let start = Instant::now();
        for row in 0..rows {
            let key = self.extractor.extract(self.input.as_ref(), row);
            map.insert(key, row + self.row_offset);
        }
        trace!(
            rows,
            row_offset = self.row_offset,
            strategy = %map.strategy(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Shared build task finished"
        );
        Ok(())
    }
}

/// Completed shared index; a read-only handle over the map all tasks filled.
#[derive(Debug)]
pub struct SharedHashTable {
    map: Arc<dyn ConcurrentMultiMap>,
    extractor: KeyExtractor,
    distinct: DistinctKeyCache,
    /// Entry count the cached distinct-key count was taken at.
    counted_entries: AtomicUsize,
}

impl SharedHashTable {
    pub fn new(map: Arc<dyn ConcurrentMultiMap>, extractor: KeyExtractor) -> Self {
        debug!(
            entries = map.len(),
            strategy = %map.strategy(),
            "Shared hash table sealed"
        );
        let counted_entries = AtomicUsize::new(map.len());
        Self {
            map,
            extractor,
            distinct: DistinctKeyCache::new(),
            counted_entries,
        }
    }

    /// Split `table` into `workers` ranges, hash them concurrently into one map
    /// of the given strategy and seal it once every task finished.
    pub fn build_parallel(
        table: Arc<dyn Table>,
        extractor: KeyExtractor,
        strategy: MapStrategy,
        workers: usize,
        scheduler: &dyn TaskScheduler,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("shared build needs at least one worker".to_string()));
        }
        extractor.check_columns(table.as_ref())?;
        let start = Instant::now();
        let map = strategy.create_map();
        let mut builds = Vec::with_capacity(workers);
        for rows in split_rows(table.row_count(), workers) {
            let range: Arc<dyn Table> = Arc::new(TableRange::new(table.clone(), rows)?);
            builds.push(SharedHashBuild::new(range, extractor.clone())?.with_map(map.clone()));
        }

        let tasks: Vec<BuildTask<'_>> = builds
            .iter()
            .map(|build| Box::new(move || build.execute()) as BuildTask<'_>)
            .collect();
        scheduler.run_to_completion(tasks)?;

        crate::log_build!("shared_hash", table.row_count(), workers, map.len(), start.elapsed());
        Ok(Self::new(map, extractor))
    }

    pub fn strategy(&self) -> MapStrategy {
        self.map.strategy()
    }

    pub fn map(&self) -> &Arc<dyn ConcurrentMultiMap> {
        &self.map
    }

    pub fn extractor(&self) -> &KeyExtractor {
        &self.extractor
    }

    pub fn snapshot(&self) -> Vec<(Key, PositionList)> {
        self.map.snapshot()
    }
}

impl Clone for SharedHashTable {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
            extractor: self.extractor.clone(),
            distinct: self.distinct.clone(),
            counted_entries: AtomicUsize::new(self.counted_entries.load(Ordering::Acquire)),
        }
    }
}

impl HashIndex for SharedHashTable {
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
        // The map handle may outlive the build and take more inserts.
        let entries = self.map.len();
        if self.counted_entries.swap(entries, Ordering::AcqRel) != entries {
            self.distinct.invalidate();
        }
        self.distinct.get_or_compute(|| self.map.num_keys())
    }
}

impl PositionIndex for SharedHashTable {
    fn get(&self, key: &Key) -> PositionList {
        self.map.get(key)
    }
}
