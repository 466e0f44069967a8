//! Aggregation functions and the registry that resolves them by name.
//!
//! Every function folds `i64` contributions and must be commutative and
//! associative: concurrent builds apply updates in arbitrary interleavings and
//! merges combine partial results in arbitrary order.

use crate::table::Table;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub mod atomic;
pub mod hash_map;

pub use atomic::{AtomicAggregateBuild, AtomicAggregateMap, AtomicAggregateTable};
pub use hash_map::AggregateHashMap;

pub trait AggregateFunction: Send + Sync + fmt::Debug {
    /// Registry name, upper case
    fn name(&self) -> &str;

    fn is_commutative(&self) -> bool {
        true
    }

    fn is_associative(&self) -> bool {
        true
    }

    /// Whether the value column must hold integers
    fn requires_integer_column(&self) -> bool {
        true
    }

    /// Contribution of one row, or `None` if the row is skipped.
    fn admit(&self, value: Option<i64>) -> Option<i64> {
        value
    }

    /// Aggregate state for a key whose first contribution is `contribution`.
    fn initial_value(&self, contribution: i64) -> i64;

    /// Fold a contribution into shared state, atomically.
    fn update(&self, current: &AtomicI64, contribution: i64);

    /// Fold a contribution into exclusively owned state.
    fn accumulate(&self, current: &mut i64, contribution: i64);

    /// Fold a partial aggregate produced elsewhere.
    fn combine(&self, current: &mut i64, partial: i64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl AggregateFunction for Sum {
    fn name(&self) -> &str {
        "SUM"
    }

    fn initial_value(&self, contribution: i64) -> i64 {
        contribution
    }

    fn update(&self, current: &AtomicI64, contribution: i64) {
        current.fetch_add(contribution, Ordering::AcqRel);
    }

    fn accumulate(&self, current: &mut i64, contribution: i64) {
        *current = current.wrapping_add(contribution);
    }

    fn combine(&self, current: &mut i64, partial: i64) {
        *current = current.wrapping_add(partial);
    }
}

/// Counts rows, null or not; the value column is never read as a number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl AggregateFunction for Count {
    fn name(&self) -> &str {
        "COUNT"
    }

    fn requires_integer_column(&self) -> bool {
        false
    }

    fn admit(&self, _value: Option<i64>) -> Option<i64> {
        Some(0)
    }

    fn initial_value(&self, _contribution: i64) -> i64 {
        1
    }

    fn update(&self, current: &AtomicI64, _contribution: i64) {
        current.fetch_add(1, Ordering::AcqRel);
    }

    fn accumulate(&self, current: &mut i64, _contribution: i64) {
        *current += 1;
    }

    fn combine(&self, current: &mut i64, partial: i64) {
        *current += partial;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl AggregateFunction for Min {
    fn name(&self) -> &str {
        "MIN"
    }

    fn initial_value(&self, contribution: i64) -> i64 {
        contribution
    }

    fn update(&self, current: &AtomicI64, contribution: i64) {
        let mut observed = current.load(Ordering::Acquire);
        while contribution < observed {
            match current.compare_exchange_weak(
                observed,
                contribution,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => observed = actual,
            }
        }
    }

    fn accumulate(&self, current: &mut i64, contribution: i64) {
        *current = (*current).min(contribution);
    }

    fn combine(&self, current: &mut i64, partial: i64) {
        self.accumulate(current, partial);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl AggregateFunction for Max {
    fn name(&self) -> &str {
        "MAX"
    }

    fn initial_value(&self, contribution: i64) -> i64 {
        contribution
    }

    fn update(&self, current: &AtomicI64, contribution: i64) {
        let mut observed = current.load(Ordering::Acquire);
        while contribution > observed {
            match current.compare_exchange_weak(
                observed,
                contribution,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => observed = actual,
            }
        }
    }

    fn accumulate(&self, current: &mut i64, contribution: i64) {
        *current = (*current).max(contribution);
    }

    fn combine(&self, current: &mut i64, partial: i64) {
        self.accumulate(current, partial);
    }
}

/// Name to function lookup, built once and passed to whatever plans aggregates.
#[derive(Debug, Clone, Default)]
pub struct AggregateRegistry {
    functions: HashMap<String, Arc<dyn AggregateFunction>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding SUM, COUNT, MIN and MAX.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn AggregateFunction>; 4] =
            [Arc::new(Sum), Arc::new(Count), Arc::new(Min), Arc::new(Max)];
        for function in builtins {
            let name = function.name().to_ascii_uppercase();
            registry.functions.insert(name, function);
        }
        registry
    }

    pub fn register(&mut self, function: Arc<dyn AggregateFunction>) -> Result<()> {
        let name = function.name().to_ascii_uppercase();
        if !function.is_commutative() || !function.is_associative() {
            return Err(Error::NonCommutativeAggregate(name));
        }
        if self.functions.contains_key(&name) {
            return Err(Error::Config(format!(
                "aggregation function {} is already registered",
                name
            )));
        }
        self.functions.insert(name, function);
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn AggregateFunction>> {
        self.functions
            .get(&name.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| Error::UnsupportedAggregate(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Reject value columns the function can not read.
pub fn check_value_column(
    function: &dyn AggregateFunction,
    table: &dyn Table,
    column: usize,
) -> Result<()> {
    if column >= table.column_count() {
        return Err(Error::ColumnOutOfRange {
            column,
            columns: table.column_count(),
        });
    }
    let data_type = table.data_type(column);
    if function.requires_integer_column() && !data_type.is_integer() {
        return Err(Error::Config(format!(
            "{} needs an integer column, column {} is {}",
            function.name(),
            column,
            data_type
        )));
    }
    Ok(())
}

/// Contribution of `row` to `function`, if admitted.
#[inline]
pub(crate) fn contribution(
    function: &dyn AggregateFunction,
    table: &dyn Table,
    column: usize,
    row: usize,
) -> Option<i64> {
    function.admit(table.value(column, row).as_i64())
}
