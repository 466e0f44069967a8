//! Dictionary-encoded in-memory column store.
//!
//! Every column keeps a value dictionary: each distinct value gets a dense id in
//! insertion order, and the content hash of each dictionary entry is computed
//! once so join-key extraction never rehashes cell contents.

use super::{DataType, Table, Value, ValueId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Columnar table with per-column dictionaries
#[derive(Debug, Clone)]
pub struct ColumnarTable {
    schema: TableSchema,
    columns: Vec<Column>,
    row_count: usize,
}

/// Table schema definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDefinition>,
}

/// Column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
struct Column {
    definition: ColumnDefinition,
    dictionary: ValueDictionary,
    ids: Vec<ValueId>,
}

/// Value dictionary for one column
#[derive(Debug, Clone, Default)]
pub struct ValueDictionary {
    value_to_id: HashMap<Value, ValueId>,
    values: Vec<Value>,
    hashes: Vec<u64>,
}

impl ValueDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or insert a value and return its id
    pub fn get_or_insert_id(&mut self, value: Value) -> ValueId {
        if let Some(&id) = self.value_to_id.get(&value) {
            return id;
        }
        let id = self.values.len() as ValueId;
        self.hashes.push(value.content_hash());
        self.value_to_id.insert(value.clone(), id);
        self.values.push(value);
        id
    }

    pub fn get_value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id as usize)
    }

    pub fn get_id(&self, value: &Value) -> Option<ValueId> {
        self.value_to_id.get(value).copied()
    }

    fn hash_of(&self, id: ValueId) -> u64 {
        self.hashes[id as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ColumnarTable {
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.columns.iter().position(|c| c.name == name)
    }

    /// Number of distinct values stored in a column's dictionary
    pub fn distinct_values(&self, column: usize) -> usize {
        self.columns[column].dictionary.len()
    }

    /// Build a table from named `Int64` columns of equal length.
    pub fn from_i64_columns(columns: &[(&str, Vec<i64>)]) -> Result<Self> {
        let mut builder = ColumnarTableBuilder::new();
        for (name, _) in columns {
            builder = builder.column(name, DataType::Int64, false);
        }
        let rows = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
        for row in 0..rows {
            let mut values = Vec::with_capacity(columns.len());
            for (name, column) in columns {
                let value = column.get(row).ok_or_else(|| {
                    Error::Config(format!("column '{}' is shorter than {} rows", name, rows))
                })?;
                values.push(Value::Int64(*value));
            }
            builder.append_row(values)?;
        }
        builder.build()
    }
}

impl Table for ColumnarTable {
    fn row_count(&self) -> usize {
        self.row_count
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn data_type(&self, column: usize) -> DataType {
        self.columns[column].definition.data_type
    }

    fn value_id(&self, column: usize, row: usize) -> ValueId {
        self.columns[column].ids[row]
    }

    fn value_hash(&self, column: usize, row: usize) -> u64 {
        let column = &self.columns[column];
        column.dictionary.hash_of(column.ids[row])
    }

    fn value(&self, column: usize, row: usize) -> Value {
        let column = &self.columns[column];
        column
            .dictionary
            .get_value(column.ids[row])
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Row-wise builder for [`ColumnarTable`]
#[derive(Debug, Default)]
pub struct ColumnarTableBuilder {
    schema: TableSchema,
    columns: Vec<Column>,
    row_count: usize,
}

impl ColumnarTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column definition. Columns must be declared before the first row.
    pub fn column(mut self, name: &str, data_type: DataType, nullable: bool) -> Self {
        let definition = ColumnDefinition {
            name: name.to_string(),
            data_type,
            nullable,
        };
        self.schema.columns.push(definition.clone());
        self.columns.push(Column {
            definition,
            dictionary: ValueDictionary::new(),
            ids: Vec::new(),
        });
        self
    }

    pub fn append_row(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::Config(format!(
                "row has {} values but table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(values.iter()) {
            match value.data_type() {
                None if !column.definition.nullable => {
                    return Err(Error::Config(format!(
                        "column '{}' is not nullable",
                        column.definition.name
                    )));
                }
                Some(data_type) if data_type != column.definition.data_type => {
                    return Err(Error::Config(format!(
                        "value of type {} does not match column '{}' of type {}",
                        data_type, column.definition.name, column.definition.data_type
                    )));
                }
                _ => {}
            }
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            let id = column.dictionary.get_or_insert_id(value);
            column.ids.push(id);
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn build(self) -> Result<ColumnarTable> {
        if self.columns.is_empty() {
            return Err(Error::Config("table needs at least one column".to_string()));
        }
        Ok(ColumnarTable {
            schema: self.schema,
            columns: self.columns,
            row_count: self.row_count,
        })
    }
}
