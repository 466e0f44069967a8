use super::{
    count_key_groups, DistinctKeyCache, HashIndex, HashTable, Key, KeyKind, Position,
    PositionIndex, PositionList,
};
use crate::{Error, Result};
use std::sync::Arc;

/// Read-only slice of a completed [`HashTable`], bounded in distinct keys.
///
/// The bounds always fall on key-group boundaries of the parent's entry
/// sequence, so adjacent views partition the entries without splitting a key.
#[derive(Debug, Clone)]
pub struct HashTableView {
    parent: Arc<HashTable>,
    begin: usize,
    end: usize,
    entries: usize,
    distinct: DistinctKeyCache,
}

impl HashTableView {
    pub fn new(parent: Arc<HashTable>, first: usize, last: usize) -> Result<Self> {
        if first > last {
            return Err(Error::InvalidRange { first, last });
        }
        let begin = Self::advance(&parent, 0, first);
        let end = Self::advance(&parent, begin, last - first);
        let entries = parent.groups()[begin..end]
            .iter()
            .map(|group| group.positions.len())
            .sum();
        Ok(Self {
            parent,
            begin,
            end,
            entries,
            distinct: DistinctKeyCache::new(),
        })
    }

    /// Move `keys` key groups forward from `from`, clamping at the end.
    fn advance(parent: &HashTable, from: usize, keys: usize) -> usize {
        from.saturating_add(keys).min(parent.groups().len())
    }

    pub fn parent(&self) -> &Arc<HashTable> {
        &self.parent
    }

    /// Entries of this view, key-grouped.
    pub fn entries(&self) -> impl Iterator<Item = (&Key, Position)> + '_ {
        self.parent.groups()[self.begin..self.end]
            .iter()
            .flat_map(|group| group.positions.iter().map(move |&p| (&group.key, p)))
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

impl HashIndex for HashTableView {
    fn key_kind(&self) -> KeyKind {
        self.parent.key_kind()
    }

    fn fields(&self) -> &[usize] {
        self.parent.fields()
    }

    fn size(&self) -> usize {
        self.entries
    }

    fn num_distinct_keys(&self) -> u64 {
        self.distinct
            .get_or_compute(|| count_key_groups(self.entries().map(|(key, _)| key)))
    }
}

impl PositionIndex for HashTableView {
    fn get(&self, key: &Key) -> PositionList {
        match self.parent.slot_of(key) {
            Some(slot) if slot >= self.begin && slot < self.end => {
                self.parent.groups()[slot].positions.to_vec()
            }
            _ => Vec::new(),
        }
    }
}
