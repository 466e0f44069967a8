use super::{
    count_key_groups, DistinctKeyCache, HashIndex, HashTableView, Key, KeyExtractor, KeyKind,
    Position, PositionIndex, PositionList,
};
use crate::table::Table;
use crate::{Error, Result};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// All positions stored under one key
#[derive(Debug, Clone)]
pub(crate) struct KeyGroup {
    pub(crate) key: Key,
    pub(crate) positions: SmallVec<[Position; 2]>,
}

/// Single-threaded multi-valued hash index from key to row positions.
///
/// Entries are kept grouped by key in first-insertion order, so iterating the
/// entry sequence visits every position of a key contiguously. Views rely on
/// that order being stable once the build is done.
#[derive(Debug, Clone)]
pub struct HashTable {
    table: Option<Arc<dyn Table>>,
    extractor: KeyExtractor,
    slots: HashMap<Key, usize>,
    groups: Vec<KeyGroup>,
    entries: usize,
    distinct: DistinctKeyCache,
}

impl HashTable {
    /// Empty index over `fields`; no source table attached.
    pub fn new(kind: KeyKind, fields: Vec<usize>) -> Result<Self> {
        Ok(Self {
            table: None,
            extractor: KeyExtractor::new(kind, fields)?,
            slots: HashMap::new(),
            groups: Vec::new(),
            entries: 0,
            distinct: DistinctKeyCache::new(),
        })
    }

    /// Hash every row of `table`. Positions are shifted by the table's own base
    /// offset, so an index over a [`TableRange`](crate::table::TableRange) reports
    /// positions of the parent table.
    pub fn build(table: Arc<dyn Table>, fields: Vec<usize>, kind: KeyKind) -> Result<Self> {
        let row_offset = table.base_offset();
        Self::build_with_offset(table, fields, kind, row_offset)
    }

    pub fn build_with_offset(
        table: Arc<dyn Table>,
        fields: Vec<usize>,
        kind: KeyKind,
        row_offset: usize,
    ) -> Result<Self> {
        let extractor = KeyExtractor::for_table(kind, fields, table.as_ref())?;
        let rows = table.row_count();
        row_offset
            .checked_add(rows)
            .ok_or(Error::PositionOverflow)?;

        let start = Instant::now();
        let mut index = Self {
            table: Some(table.clone()),
            extractor,
            slots: HashMap::with_capacity(rows),
            groups: Vec::new(),
            entries: 0,
            distinct: DistinctKeyCache::new(),
        };
        for row in 0..rows {
            let key = index.extractor.extract(table.as_ref(), row);
            index.insert(key, row + row_offset);
        }
        debug!(
            rows,
            keys = index.groups.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Hash table built"
        );
        Ok(index)
    }

    /// Union of several indices over the same key layout.
    ///
    /// The first index is copied and the others' entries are appended on top of
    /// it; positions for a key appearing in several inputs accumulate.
    pub fn merge(indices: &[Arc<HashTable>]) -> Result<Self> {
        let (first, rest) = indices
            .split_first()
            .ok_or_else(|| Error::Config("merge needs at least one hash table".to_string()))?;
        let mut merged = first.as_ref().clone();
        for other in rest {
            merged.check_layout(other)?;
            for group in &other.groups {
                for &position in &group.positions {
                    merged.insert(group.key.clone(), position);
                }
            }
        }
        debug!(inputs = indices.len(), entries = merged.entries, "Hash tables merged");
        Ok(merged)
    }

    fn check_layout(&self, other: &HashTable) -> Result<()> {
        if self.extractor.kind() != other.extractor.kind()
            || self.extractor.columns().len() != other.extractor.columns().len()
        {
            return Err(Error::KeyMismatch {
                expected: self.extractor.columns().len(),
                actual: other.extractor.columns().len(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, key: Key, position: Position) {
        self.distinct.invalidate();
        self.entries += 1;
        if let Some(&slot) = self.slots.get(&key) {
            self.groups[slot].positions.push(position);
            return;
        }
        self.slots.insert(key.clone(), self.groups.len());
        let mut positions = SmallVec::new();
        positions.push(position);
        self.groups.push(KeyGroup { key, positions });
    }

    /// Split off keys `[first, last)` (counted in distinct keys) as a read-only view.
    pub fn view(self: &Arc<Self>, first: usize, last: usize) -> Result<HashTableView> {
        HashTableView::new(Arc::clone(self), first, last)
    }

    pub fn table(&self) -> Option<&Arc<dyn Table>> {
        self.table.as_ref()
    }

    pub fn extractor(&self) -> &KeyExtractor {
        &self.extractor
    }

    /// Key-grouped entry sequence.
    pub fn entries(&self) -> impl Iterator<Item = (&Key, Position)> + '_ {
        self.groups
            .iter()
            .flat_map(|group| group.positions.iter().map(move |&p| (&group.key, p)))
    }

    pub(crate) fn groups(&self) -> &[KeyGroup] {
        &self.groups
    }

    pub(crate) fn slot_of(&self, key: &Key) -> Option<usize> {
        self.slots.get(key).copied()
    }

    /// Load statistics of the underlying map
    pub fn stats(&self) -> String {
        format!(
            "Entries {} / Keys {} / Capacity {}",
            self.entries,
            self.groups.len(),
            self.slots.capacity()
        )
    }
}

impl HashIndex for HashTable {
    fn key_kind(&self) -> KeyKind {
        self.extractor.kind()
    }

    fn fields(&self) -> &[usize] {
        self.extractor.columns()
    }

    fn size(&self) -> usize {
        self.entries
    }

    fn num_distinct_keys(&self) -> u64 {
        self.distinct
            .get_or_compute(|| count_key_groups(self.entries().map(|(key, _)| key)))
    }
}

impl PositionIndex for HashTable {
    fn get(&self, key: &Key) -> PositionList {
        match self.slots.get(key) {
            Some(&slot) => self.groups[slot].positions.to_vec(),
            None => Vec::new(),
        }
    }
}
