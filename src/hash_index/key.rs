//! Key extraction shared by build and probe paths.
//!
//! A key is either a single scalar or an ordered sequence of scalars. Group-by
//! keys use dictionary value ids; join keys use content hashes so that two
//! tables with different dictionaries agree on equal values.

use crate::table::Table;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

/// Mixing constant from the golden ratio, as in boost `hash_combine`.
const HASH_COMBINE_SEED: u64 = 0x9e37_79b9;

/// What a key element is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Encoded value ids; only comparable against the same table.
    #[serde(rename = "groupby")]
    GroupBy,
    /// Content hashes; comparable across tables.
    #[serde(rename = "join")]
    Join,
}

/// Single-column keys skip the sequence allocation entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    Single,
    Composite,
}

impl KeyShape {
    pub fn for_columns(columns: usize) -> Self {
        if columns == 1 {
            KeyShape::Single
        } else {
            KeyShape::Composite
        }
    }
}

/// Hash-table key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    Single(u64),
    Composite(SmallVec<[u64; 4]>),
}

impl Key {
    pub fn composite(elements: impl IntoIterator<Item = u64>) -> Self {
        Key::Composite(elements.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Key::Single(_) => 1,
            Key::Composite(elements) => elements.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Order-sensitive hash of the key. For single keys this is the scalar itself.
    pub fn hash_value(&self) -> u64 {
        match self {
            Key::Single(value) => *value,
            Key::Composite(elements) => elements.iter().fold(0, |seed, e| combine_hash(seed, *e)),
        }
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

/// Fold one element hash into a running seed.
pub fn combine_hash(seed: u64, element: u64) -> u64 {
    seed ^ element
        .wrapping_add(HASH_COMBINE_SEED)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Derives keys for one column list. Build and probe must use the same
/// extractor configuration or lookups will silently miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExtractor {
    kind: KeyKind,
    shape: KeyShape,
    columns: Vec<usize>,
}

impl KeyExtractor {
    pub fn new(kind: KeyKind, columns: Vec<usize>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Config("hash index needs at least one key column".to_string()));
        }
        Ok(Self {
            kind,
            shape: KeyShape::for_columns(columns.len()),
            columns,
        })
    }

    /// Build an extractor and check every key column exists in `table`.
    pub fn for_table(kind: KeyKind, columns: Vec<usize>, table: &dyn Table) -> Result<Self> {
        let extractor = Self::new(kind, columns)?;
        extractor.check_columns(table)?;
        Ok(extractor)
    }

    pub fn check_columns(&self, table: &dyn Table) -> Result<()> {
        let available = table.column_count();
        match self.columns.iter().find(|&&c| c >= available) {
            Some(&column) => Err(Error::ColumnOutOfRange {
                column,
                columns: available,
            }),
            None => Ok(()),
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn shape(&self) -> KeyShape {
        self.shape
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Same kind, different columns, for probing another table.
    pub fn with_columns(&self, columns: &[usize]) -> Result<Self> {
        if columns.len() != self.columns.len() {
            return Err(Error::KeyMismatch {
                expected: self.columns.len(),
                actual: columns.len(),
            });
        }
        Self::new(self.kind, columns.to_vec())
    }

    pub fn extract(&self, table: &dyn Table, row: usize) -> Key {
        match self.shape {
            KeyShape::Single => Key::Single(self.element(table, self.columns[0], row)),
            KeyShape::Composite => Key::Composite(
                self.columns
                    .iter()
                    .map(|&column| self.element(table, column, row))
                    .collect(),
            ),
        }
    }

    #[inline]
    fn element(&self, table: &dyn Table, column: usize, row: usize) -> u64 {
        match self.kind {
            KeyKind::GroupBy => table.value_id(column, row) as u64,
            KeyKind::Join => table.value_hash(column, row),
        }
    }
}
