//! Operator configuration as delivered by the enclosing plan framework.
//!
//! Field names follow the JSON plan format (`numCores`, `aggrFunField`, ...).
//! Every config is validated before any task is scheduled.

pub use crate::hash_index::MapStrategy;
use crate::hash_index::KeyKind;
use crate::join::RadixBits;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

fn default_workers() -> usize {
    1
}

fn default_group_function() -> String {
    "SUM".to_string()
}

fn check_fields(fields: &[usize]) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::Config("at least one key field is required".into()));
    }
    Ok(())
}

/// Single-threaded hash build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashBuildConfig {
    pub fields: Vec<usize>,
    pub key: KeyKind,
}

impl HashBuildConfig {
    pub fn validate(&self) -> Result<()> {
        check_fields(&self.fields)
    }
}

/// Aggregate column and function name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub field: usize,
    #[serde(rename = "type")]
    pub function: String,
}

/// Concurrent build of one shared index, optionally aggregating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedBuildConfig {
    pub fields: Vec<usize>,
    pub key: KeyKind,
    #[serde(rename = "numCores", default = "default_workers")]
    pub num_cores: usize,
    #[serde(default)]
    pub strategy: MapStrategy,
    #[serde(rename = "aggregateFunction", default, skip_serializing_if = "Option::is_none")]
    pub aggregate_function: Option<AggregateSpec>,
}

impl SharedBuildConfig {
    pub fn validate(&self) -> Result<()> {
        check_fields(&self.fields)?;
        if self.num_cores == 0 {
            return Err(Error::Config("numCores must be greater than 0".into()));
        }
        if let Some(spec) = &self.aggregate_function {
            if spec.function.trim().is_empty() {
                return Err(Error::Config("aggregateFunction.type must not be empty".into()));
            }
            // Aggregates update entries atomically and never take the map lock.
            if self.strategy == MapStrategy::Locked {
                return Err(Error::Config(
                    "strategy \"locked\" can not be combined with aggregateFunction".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Per-partition aggregate build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByConfig {
    pub fields: Vec<usize>,
    #[serde(rename = "aggrFunField")]
    pub aggr_fun_field: usize,
    #[serde(rename = "aggrFunType", default = "default_group_function")]
    pub function: String,
}

impl GroupByConfig {
    pub fn validate(&self) -> Result<()> {
        check_fields(&self.fields)
    }
}

/// Partitioned join probe
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinProbeConfig {
    pub bits1: u32,
    pub bits2: u32,
    /// Left partitions to probe; empty means all of them.
    #[serde(default)]
    pub partitions: Vec<usize>,
    /// Post-filter candidate pairs on actual column values.
    #[serde(default)]
    pub verify: bool,
    #[serde(rename = "leftFields", default)]
    pub left_fields: Vec<usize>,
    #[serde(rename = "rightFields", default)]
    pub right_fields: Vec<usize>,
}

impl JoinProbeConfig {
    pub fn radix_bits(&self) -> Result<RadixBits> {
        RadixBits::new(self.bits1, self.bits2)
    }

    pub fn validate(&self) -> Result<()> {
        self.radix_bits()?;
        if self.verify {
            check_fields(&self.left_fields)?;
            if self.left_fields.len() != self.right_fields.len() {
                return Err(Error::KeyMismatch {
                    expected: self.left_fields.len(),
                    actual: self.right_fields.len(),
                });
            }
        }
        Ok(())
    }
}
