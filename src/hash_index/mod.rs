//! Hash indices used by equi-joins and group-by aggregation.
//!
//! A small closed set of variants implements one capability interface:
//!
//! - [`HashTable`]: single-threaded build, key-grouped entries, splittable into views
//! - [`HashTableView`]: read-only, key-group-aligned slice of a `HashTable`
//! - [`SharedHashTable`]: one multimap filled concurrently by many build tasks
//! - [`AtomicAggregateTable`](crate::aggregate::AtomicAggregateTable): shared map of
//!   atomically folded aggregates
//! - [`AggregateHashMap`](crate::aggregate::AggregateHashMap): single-threaded
//!   aggregates, mergeable across partitions

use crate::aggregate::{AggregateHashMap, AtomicAggregateTable};
use crate::table::Table;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub mod key;
pub mod shared;
pub mod table;
pub mod view;

pub use key::{combine_hash, Key, KeyExtractor, KeyKind, KeyShape};
pub use shared::{
    ConcurrentMultiMap, LockFreeMultiMap, LockedMultiMap, MapStrategy, SharedHashBuild,
    SharedHashTable,
};
pub use table::HashTable;
pub use view::HashTableView;

/// Row position, in the coordinate space of the outermost table.
pub type Position = usize;

pub type PositionList = Vec<Position>;

/// Capability shared by every hash index variant.
pub trait HashIndex: Send + Sync {
    fn key_kind(&self) -> KeyKind;

    /// Key columns the index was built over
    fn fields(&self) -> &[usize];

    /// Number of stored entries, not distinct keys.
    fn size(&self) -> usize;

    fn num_distinct_keys(&self) -> u64;
}

/// Indices whose entries are row positions.
pub trait PositionIndex: HashIndex {
    /// All positions stored under `key`; empty if absent.
    fn get(&self, key: &Key) -> PositionList;

    /// Compute the key of `row` in an external table and look it up.
    fn get_row(&self, table: &dyn Table, columns: &[usize], row: usize) -> Result<PositionList> {
        let extractor = KeyExtractor::new(self.key_kind(), self.fields().to_vec())?
            .with_columns(columns)?;
        extractor.check_columns(table)?;
        Ok(self.get(&extractor.extract(table, row)))
    }
}

/// Indices whose entries are per-key aggregates.
pub trait AggregateIndex: HashIndex {
    fn aggregate(&self, key: &Key) -> Option<i64>;

    /// Snapshot of every (key, aggregate) pair, in no particular order.
    fn aggregates(&self) -> Vec<(Key, i64)>;
}

/// Lazily computed distinct-key count guarded by a dirty flag.
///
/// Mutators call [`invalidate`](Self::invalidate); the next read recomputes with a
/// single linear scan and caches the result.
#[derive(Debug)]
pub struct DistinctKeyCache {
    count: AtomicU64,
    dirty: AtomicBool,
}

impl DistinctKeyCache {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            dirty: AtomicBool::new(true),
        }
    }

    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> u64) -> u64 {
        if self.dirty.load(Ordering::Acquire) {
            let count = compute();
            self.count.store(count, Ordering::Relaxed);
            self.dirty.store(false, Ordering::Release);
            count
        } else {
            self.count.load(Ordering::Relaxed)
        }
    }
}

impl Default for DistinctKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for DistinctKeyCache {
    fn clone(&self) -> Self {
        Self {
            count: AtomicU64::new(self.count.load(Ordering::Relaxed)),
            dirty: AtomicBool::new(self.dirty.load(Ordering::Acquire)),
        }
    }
}

/// Count the boundaries between runs of equal keys in a key-grouped entry sequence.
pub fn count_key_groups<'a>(keys: impl IntoIterator<Item = &'a Key>) -> u64 {
    let mut groups = 0;
    let mut previous: Option<&Key> = None;
    for key in keys {
        if previous != Some(key) {
            groups += 1;
            previous = Some(key);
        }
    }
    groups
}

/// Result of a build operator, one variant per index kind.
#[derive(Debug, Clone)]
pub enum BuiltIndex {
    Table(Arc<HashTable>),
    Shared(Arc<SharedHashTable>),
    AtomicAggregate(Arc<AtomicAggregateTable>),
    Aggregate(Arc<AggregateHashMap>),
}

impl BuiltIndex {
    pub fn as_hash_index(&self) -> &dyn HashIndex {
        match self {
            BuiltIndex::Table(index) => index.as_ref(),
            BuiltIndex::Shared(index) => index.as_ref(),
            BuiltIndex::AtomicAggregate(index) => index.as_ref(),
            BuiltIndex::Aggregate(index) => index.as_ref(),
        }
    }

    pub fn as_position_index(&self) -> Option<&dyn PositionIndex> {
        match self {
            BuiltIndex::Table(index) => Some(index.as_ref()),
            BuiltIndex::Shared(index) => Some(index.as_ref()),
            _ => None,
        }
    }

    pub fn as_aggregate_index(&self) -> Option<&dyn AggregateIndex> {
        match self {
            BuiltIndex::AtomicAggregate(index) => Some(index.as_ref()),
            BuiltIndex::Aggregate(index) => Some(index.as_ref()),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        self.as_hash_index().size()
    }

    pub fn num_distinct_keys(&self) -> u64 {
        self.as_hash_index().num_distinct_keys()
    }
}
