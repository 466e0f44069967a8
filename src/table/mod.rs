//! Table access layer consumed by the hash indices.
//!
//! Indices never look at physical column layouts. They see rows through the
//! [`Table`] trait: dictionary value ids for group-by keys, content hashes for
//! join keys (which must agree across differently encoded tables), and a base
//! offset for sub-range views so positions can be expressed in the coordinate
//! space of the parent table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Range;

pub mod columnar;
pub mod range;

pub use columnar::{ColumnDefinition, ColumnarTable, ColumnarTableBuilder, TableSchema, ValueDictionary};
pub use range::TableRange;

/// Dictionary-encoded value identifier, local to one column of one table.
pub type ValueId = u32;

/// Row access contract required by every hash index.
pub trait Table: Send + Sync + fmt::Debug {
    fn row_count(&self) -> usize;

    fn column_count(&self) -> usize;

    fn data_type(&self, column: usize) -> DataType;

    /// Encoded value id of a cell. Only comparable within the same column of the same table.
    fn value_id(&self, column: usize, row: usize) -> ValueId;

    /// Hash of the cell's logical value. Equal values hash equally across tables.
    fn value_hash(&self, column: usize, row: usize) -> u64;

    fn value(&self, column: usize, row: usize) -> Value;

    /// Position of row 0 in the coordinate space of the outermost table.
    fn base_offset(&self) -> usize {
        0
    }
}

/// Data types supported by the column store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int32,
    Int64,
    Float64,
    String,
    Bool,
}

impl DataType {
    /// Whether cells of this type can feed an integer aggregate
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Float64 => "FLOAT64",
            DataType::String => "STRING",
            DataType::Bool => "BOOL",
        };
        f.write_str(name)
    }
}

/// Logical cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bool(bool),
    Null,
}

impl Value {
    /// Get the data type of this value, `None` for NULL
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::String(_) => Some(DataType::String),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Content hash used for join keys.
    ///
    /// `DefaultHasher::new()` is keyed with constants, so the result is stable for
    /// the lifetime of the process and identical for equal values in any table.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Int32(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Int64(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::Float64(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::String(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Value::Bool(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            Value::Null => {
                5u8.hash(state);
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// Split `rows` into `parts` contiguous ranges whose lengths differ by at most one.
pub fn split_rows(rows: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = rows / parts;
    let extra = rows % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let len = base + usize::from(part < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rows_covers_all_rows() {
        let ranges = split_rows(10, 4);
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);

        let ranges = split_rows(2, 4);
        assert_eq!(ranges, vec![0..1, 1..2, 2..2, 2..2]);

        assert!(split_rows(5, 0).is_empty());
    }

    #[test]
    fn test_content_hash_is_type_tagged() {
        assert_eq!(Value::Int64(7).content_hash(), Value::Int64(7).content_hash());
        assert_ne!(Value::Int64(7).content_hash(), Value::Int32(7).content_hash());
        assert_ne!(Value::from("a").content_hash(), Value::from("b").content_hash());
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(Value::Int32(-3).as_i64(), Some(-3));
        assert_eq!(Value::Int64(9).as_i64(), Some(9));
        assert_eq!(Value::Float64(1.0).as_i64(), None);
        assert_eq!(Value::Null.as_i64(), None);
    }
}
