use super::{DataType, Table, Value, ValueId};
use crate::{Error, Result};
use std::ops::Range;
use std::sync::Arc;

/// Contiguous row range of another table.
///
/// Row `i` of the range is row `start + i` of the parent, and `base_offset`
/// composes so nested ranges still report positions of the outermost table.
#[derive(Debug, Clone)]
pub struct TableRange {
    parent: Arc<dyn Table>,
    start: usize,
    end: usize,
}

impl TableRange {
    pub fn new(parent: Arc<dyn Table>, rows: Range<usize>) -> Result<Self> {
        if rows.start > rows.end || rows.end > parent.row_count() {
            return Err(Error::Config(format!(
                "row range {}..{} exceeds table of {} rows",
                rows.start,
                rows.end,
                parent.row_count()
            )));
        }
        Ok(Self {
            parent,
            start: rows.start,
            end: rows.end,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn parent(&self) -> &Arc<dyn Table> {
        &self.parent
    }
}

impl Table for TableRange {
    fn row_count(&self) -> usize {
        self.end - self.start
    }

    fn column_count(&self) -> usize {
        self.parent.column_count()
    }

    fn data_type(&self, column: usize) -> DataType {
        self.parent.data_type(column)
    }

    fn value_id(&self, column: usize, row: usize) -> ValueId {
        self.parent.value_id(column, self.start + row)
    }

    fn value_hash(&self, column: usize, row: usize) -> u64 {
        self.parent.value_hash(column, self.start + row)
    }

    fn value(&self, column: usize, row: usize) -> Value {
        self.parent.value(column, self.start + row)
    }

    fn base_offset(&self) -> usize {
        self.parent.base_offset() + self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnarTable;

    #[test]
    fn test_nested_ranges_compose_offsets() {
        let table: Arc<dyn Table> =
            Arc::new(ColumnarTable::from_i64_columns(&[("a", (0..10).collect())]).unwrap());
        let outer: Arc<dyn Table> = Arc::new(TableRange::new(table, 2..9).unwrap());
        let inner = TableRange::new(outer, 3..5).unwrap();

        assert_eq!(inner.row_count(), 2);
        assert_eq!(inner.base_offset(), 5);
        assert_eq!(inner.value(0, 0), Value::Int64(5));
        assert_eq!(inner.value(0, 1), Value::Int64(6));
    }

    #[test]
    fn test_range_bounds_are_checked() {
        let table: Arc<dyn Table> =
            Arc::new(ColumnarTable::from_i64_columns(&[("a", vec![1, 2, 3])]).unwrap());
        assert!(TableRange::new(table.clone(), 1..4).is_err());
        assert!(TableRange::new(table.clone(), 3..3).is_ok());
    }
}
