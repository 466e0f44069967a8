//! Plan operators around the hash indices and the join probe.
//!
//! Operators are parsed from JSON plan nodes through an [`OperatorRegistry`]
//! built at startup and run against explicit inputs inside an
//! [`ExecutionContext`]. Parsing resolves aggregate names and validates the
//! configuration, so a plan that parses never fails on configuration later.

use crate::aggregate::{AggregateFunction, AggregateHashMap, AggregateRegistry, AtomicAggregateTable};
use crate::config::{GroupByConfig, HashBuildConfig, JoinProbeConfig, SharedBuildConfig};
use crate::hash_index::{
    BuiltIndex, ConcurrentMultiMap, HashTable, KeyExtractor, KeyKind, SharedHashBuild,
    SharedHashTable,
};
use crate::join::{verify_exact, EquiJoinProbe, JoinPositions, JoinSide};
use crate::scheduler::{InlineScheduler, TaskScheduler};
use crate::table::Table;
use crate::{Error, Result};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Shared services operators run with
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    aggregates: AggregateRegistry,
    scheduler: Arc<dyn TaskScheduler>,
}

impl ExecutionContext {
    pub fn new(aggregates: AggregateRegistry, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            aggregates,
            scheduler,
        }
    }

    /// Built-in aggregates, tasks run on the calling thread.
    pub fn inline() -> Self {
        Self::new(AggregateRegistry::with_builtins(), Arc::new(InlineScheduler))
    }

    pub fn aggregates(&self) -> &AggregateRegistry {
        &self.aggregates
    }

    pub fn scheduler(&self) -> &dyn TaskScheduler {
        self.scheduler.as_ref()
    }
}

#[derive(Debug, Clone)]
pub enum OperatorInput {
    Table(Arc<dyn Table>),
    Index(BuiltIndex),
    JoinSide(Arc<JoinSide>),
    Map(Arc<dyn ConcurrentMultiMap>),
}

#[derive(Debug, Clone)]
pub enum OperatorOutput {
    Index(BuiltIndex),
    Join(JoinPositions),
}

impl OperatorOutput {
    pub fn into_index(self) -> Result<BuiltIndex> {
        match self {
            OperatorOutput::Index(index) => Ok(index),
            OperatorOutput::Join(_) => Err(Error::Config("operator produced join positions, not an index".into())),
        }
    }

    pub fn into_join(self) -> Result<JoinPositions> {
        match self {
            OperatorOutput::Join(positions) => Ok(positions),
            OperatorOutput::Index(_) => Err(Error::Config("operator produced an index, not join positions".into())),
        }
    }
}

fn table_input(inputs: &[OperatorInput], at: usize) -> Result<&Arc<dyn Table>> {
    match inputs.get(at) {
        Some(OperatorInput::Table(table)) => Ok(table),
        _ => Err(Error::Config(format!("input {} must be a table", at))),
    }
}

fn side_input(inputs: &[OperatorInput], at: usize) -> Result<&Arc<JoinSide>> {
    match inputs.get(at) {
        Some(OperatorInput::JoinSide(side)) => Ok(side),
        _ => Err(Error::Config(format!("input {} must be a partitioned join side", at))),
    }
}

/// Concurrent build of one shared index, with or without an aggregate.
///
/// Configuration and the aggregate function are resolved on construction;
/// [`execute`](Self::execute) only schedules work.
#[derive(Debug, Clone)]
pub struct SharedHashTableGenerator {
    config: SharedBuildConfig,
    aggregate: Option<(usize, Arc<dyn AggregateFunction>)>,
}

impl SharedHashTableGenerator {
    pub fn new(config: SharedBuildConfig, aggregates: &AggregateRegistry) -> Result<Self> {
        config.validate()?;
        let aggregate = match &config.aggregate_function {
            Some(spec) => Some((spec.field, aggregates.lookup(&spec.function)?)),
            None => None,
        };
        Ok(Self { config, aggregate })
    }

    pub fn config(&self) -> &SharedBuildConfig {
        &self.config
    }

    pub fn execute(&self, table: Arc<dyn Table>, scheduler: &dyn TaskScheduler) -> Result<BuiltIndex> {
        let extractor =
            KeyExtractor::for_table(self.config.key, self.config.fields.clone(), table.as_ref())?;
        let workers = self.config.num_cores;
        debug!(
            workers,
            strategy = %self.config.strategy,
            aggregate = self.aggregate.as_ref().map(|(_, f)| f.name()),
            "Scheduling shared hash build"
        );
        match &self.aggregate {
            Some((field, function)) => AtomicAggregateTable::build_parallel(
                table,
                extractor,
                *field,
                function.clone(),
                workers,
                scheduler,
            )
            .map(|index| BuiltIndex::AtomicAggregate(Arc::new(index))),
            None => SharedHashTable::build_parallel(
                table,
                extractor,
                self.config.strategy,
                workers,
                scheduler,
            )
            .map(|index| BuiltIndex::Shared(Arc::new(index))),
        }
    }
}

/// A parsed, validated plan node
#[derive(Debug, Clone)]
pub enum Operator {
    /// Build a `HashTable` from a table, or merge `HashTable` inputs.
    HashBuild(HashBuildConfig),
    SharedHashTableGenerator(SharedHashTableGenerator),
    /// One worker of a shared build; the map arrives as an input.
    SharedHashBuild(HashBuildConfig),
    GroupByBuild {
        config: GroupByConfig,
        function: Arc<dyn AggregateFunction>,
    },
    MergeAggregateHashMap,
    NestedLoopEquiJoin(JoinProbeConfig),
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::HashBuild(_) => "HashBuild",
            Operator::SharedHashTableGenerator(_) => "SharedHashTableGenerator",
            Operator::SharedHashBuild(_) => "SharedHashBuild",
            Operator::GroupByBuild { .. } => "GroupByBuild",
            Operator::MergeAggregateHashMap => "MergeAggregateHashMap",
            Operator::NestedLoopEquiJoin(_) => "NestedLoopEquiJoin",
        }
    }

    pub fn execute(&self, ctx: &ExecutionContext, inputs: &[OperatorInput]) -> Result<OperatorOutput> {
        let start = Instant::now();
        let output = match self {
            Operator::HashBuild(config) => Self::hash_build(config, inputs)?,
            Operator::SharedHashTableGenerator(generator) => {
                let table = table_input(inputs, 0)?;
                OperatorOutput::Index(generator.execute(table.clone(), ctx.scheduler())?)
            }
            Operator::SharedHashBuild(config) => Self::shared_hash_build(config, inputs)?,
            Operator::GroupByBuild { config, function } => {
                let table = table_input(inputs, 0)?;
                let extractor = KeyExtractor::new(KeyKind::GroupBy, config.fields.clone())?;
                let map = AggregateHashMap::build(
                    table.as_ref(),
                    extractor,
                    config.aggr_fun_field,
                    function.clone(),
                )?;
                OperatorOutput::Index(BuiltIndex::Aggregate(Arc::new(map)))
            }
            Operator::MergeAggregateHashMap => {
                let maps = inputs
                    .iter()
                    .enumerate()
                    .map(|(at, input)| match input {
                        OperatorInput::Index(BuiltIndex::Aggregate(map)) => Ok(map.clone()),
                        _ => Err(Error::Config(format!("input {} must be an aggregate hash map", at))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                OperatorOutput::Index(BuiltIndex::Aggregate(Arc::new(AggregateHashMap::merge(&maps)?)))
            }
            Operator::NestedLoopEquiJoin(config) => Self::equi_join(config, inputs)?,
        };
        info!(
            operator = self.name(),
            inputs = inputs.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Operator finished"
        );
        Ok(output)
    }

    fn hash_build(config: &HashBuildConfig, inputs: &[OperatorInput]) -> Result<OperatorOutput> {
        if let Some(OperatorInput::Table(table)) = inputs.first() {
            let index = HashTable::build(table.clone(), config.fields.clone(), config.key)?;
            return Ok(OperatorOutput::Index(BuiltIndex::Table(Arc::new(index))));
        }
        let tables = inputs
            .iter()
            .enumerate()
            .map(|(at, input)| match input {
                OperatorInput::Index(BuiltIndex::Table(index)) => Ok(index.clone()),
                _ => Err(Error::Config(format!("input {} must be a table or a hash table", at))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(OperatorOutput::Index(BuiltIndex::Table(Arc::new(HashTable::merge(&tables)?))))
    }

    fn shared_hash_build(config: &HashBuildConfig, inputs: &[OperatorInput]) -> Result<OperatorOutput> {
        let table = table_input(inputs, 0)?;
        let map = match inputs.get(1) {
            Some(OperatorInput::Map(map)) => map.clone(),
            _ => return Err(Error::MissingMap),
        };
        let extractor = KeyExtractor::new(config.key, config.fields.clone())?;
        SharedHashBuild::new(table.clone(), extractor.clone())?
            .with_map(map.clone())
            .execute()?;
        Ok(OperatorOutput::Index(BuiltIndex::Shared(Arc::new(SharedHashTable::new(map, extractor)))))
    }

    fn equi_join(config: &JoinProbeConfig, inputs: &[OperatorInput]) -> Result<OperatorOutput> {
        let (left, right) = (side_input(inputs, 0)?, side_input(inputs, 1)?);
        let bits = config.radix_bits()?;
        let probe = if config.partitions.is_empty() {
            EquiJoinProbe::all_partitions(bits, left)?
        } else {
            EquiJoinProbe::new(bits, config.partitions.clone())?
        };

        let start = Instant::now();
        let mut positions = probe.probe(left, right)?;
        if config.verify {
            let (left_table, right_table) = (table_input(inputs, 2)?, table_input(inputs, 3)?);
            positions = verify_exact(
                &positions,
                left_table.as_ref(),
                &config.left_fields,
                right_table.as_ref(),
                &config.right_fields,
            )?;
        }
        crate::log_probe!(probe.partitions().len(), positions.len(), start.elapsed());
        Ok(OperatorOutput::Join(positions))
    }
}

type ParseFn = fn(JsonValue, &AggregateRegistry) -> Result<Operator>;

fn parse_config<T: serde::de::DeserializeOwned>(node: JsonValue) -> Result<T> {
    Ok(serde_json::from_value(node)?)
}

fn parse_hash_build(node: JsonValue, _: &AggregateRegistry) -> Result<Operator> {
    let config: HashBuildConfig = parse_config(node)?;
    config.validate()?;
    Ok(Operator::HashBuild(config))
}

fn parse_shared_generator(node: JsonValue, aggregates: &AggregateRegistry) -> Result<Operator> {
    let config: SharedBuildConfig = parse_config(node)?;
    Ok(Operator::SharedHashTableGenerator(SharedHashTableGenerator::new(config, aggregates)?))
}

fn parse_shared_build(node: JsonValue, _: &AggregateRegistry) -> Result<Operator> {
    let config: HashBuildConfig = parse_config(node)?;
    config.validate()?;
    Ok(Operator::SharedHashBuild(config))
}

fn parse_group_by(node: JsonValue, aggregates: &AggregateRegistry) -> Result<Operator> {
    let config: GroupByConfig = parse_config(node)?;
    config.validate()?;
    let function = aggregates.lookup(&config.function)?;
    Ok(Operator::GroupByBuild { config, function })
}

fn parse_merge_aggregate(_: JsonValue, _: &AggregateRegistry) -> Result<Operator> {
    Ok(Operator::MergeAggregateHashMap)
}

fn parse_equi_join(node: JsonValue, _: &AggregateRegistry) -> Result<Operator> {
    let config: JoinProbeConfig = parse_config(node)?;
    config.validate()?;
    Ok(Operator::NestedLoopEquiJoin(config))
}

/// Operator name to parser table, populated explicitly by the caller.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    parsers: HashMap<String, ParseFn>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [(&str, ParseFn); 6] = [
            ("HashBuild", parse_hash_build),
            ("SharedHashTableGenerator", parse_shared_generator),
            ("SharedHashBuild", parse_shared_build),
            ("GroupByBuild", parse_group_by),
            ("MergeAggregateHashMap", parse_merge_aggregate),
            ("NestedLoopEquiJoin", parse_equi_join),
        ];
        for (name, parse) in defaults {
            registry.parsers.insert(name.to_string(), parse);
        }
        registry
    }

    pub fn register(&mut self, name: &str, parse: ParseFn) -> Result<()> {
        if self.parsers.contains_key(name) {
            return Err(Error::Config(format!("operator {} is already registered", name)));
        }
        self.parsers.insert(name.to_string(), parse);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Parse one plan node; its `type` field selects the operator.
    pub fn parse(&self, node: JsonValue, aggregates: &AggregateRegistry) -> Result<Operator> {
        let kind = node
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::Config("plan node has no type".into()))?
            .to_string();
        let parse = self
            .parsers
            .get(&kind)
            .ok_or_else(|| Error::Config(format!("unknown operator type {}", kind)))?;
        parse(node, aggregates)
    }

    pub fn parse_str(&self, json: &str, aggregates: &AggregateRegistry) -> Result<Operator> {
        self.parse(serde_json::from_str(json)?, aggregates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_index::{AggregateIndex, Key, PositionIndex};
    use crate::join::RadixBits;
    use crate::scheduler::RayonScheduler;
    use crate::table::ColumnarTable;

    fn table() -> Arc<dyn Table> {
        Arc::new(
            ColumnarTable::from_i64_columns(&[
                ("g", vec![1, 2, 1, 2, 3, 1]),
                ("v", vec![4, 5, 6, 7, 8, 9]),
            ])
            .unwrap(),
        )
    }

    fn parse(json: &str) -> Result<Operator> {
        OperatorRegistry::with_defaults().parse_str(json, &AggregateRegistry::with_builtins())
    }

    #[test]
    fn test_unknown_aggregate_fails_at_parse() {
        let err = parse(
            r#"{"type": "SharedHashTableGenerator", "fields": [0], "key": "groupby",
                "aggregateFunction": {"field": 1, "type": "AVG"}}"#,
        )
        .unwrap_err();
        assert_eq!(err, Error::UnsupportedAggregate("AVG".to_string()));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_operator_and_key() {
        assert!(parse(r#"{"type": "SortScan"}"#).is_err());
        assert!(parse(r#"{"fields": [0]}"#).is_err());
        assert!(parse(r#"{"type": "HashBuild", "fields": [0], "key": "bitmap"}"#).is_err());
    }

    #[test]
    fn test_shared_generator_builds_atomic_aggregate() {
        let ctx = ExecutionContext::new(
            AggregateRegistry::with_builtins(),
            Arc::new(RayonScheduler::new(2).unwrap()),
        );
        let operator = parse(
            r#"{"type": "SharedHashTableGenerator", "fields": [0], "key": "groupby",
                "numCores": 3, "aggregateFunction": {"field": 1, "type": "SUM"}}"#,
        )
        .unwrap();
        let index = operator
            .execute(&ctx, &[OperatorInput::Table(table())])
            .unwrap()
            .into_index()
            .unwrap();
        let aggregates = index.as_aggregate_index().unwrap();
        assert_eq!(aggregates.aggregate(&Key::Single(0)), Some(19));
        assert_eq!(aggregates.aggregate(&Key::Single(2)), Some(8));
        assert_eq!(index.num_distinct_keys(), 3);
    }

    #[test]
    fn test_shared_build_needs_map() {
        let ctx = ExecutionContext::inline();
        let operator = parse(r#"{"type": "SharedHashBuild", "fields": [0], "key": "join"}"#).unwrap();
        assert_eq!(
            operator.execute(&ctx, &[OperatorInput::Table(table())]).unwrap_err(),
            Error::MissingMap
        );

        let map = crate::hash_index::MapStrategy::Locked.create_map();
        let index = operator
            .execute(&ctx, &[OperatorInput::Table(table()), OperatorInput::Map(map)])
            .unwrap()
            .into_index()
            .unwrap();
        assert_eq!(index.size(), 6);
    }

    #[test]
    fn test_group_by_then_merge() {
        let ctx = ExecutionContext::inline();
        let source = table();
        let halves: Vec<Arc<dyn Table>> = vec![
            Arc::new(crate::table::TableRange::new(source.clone(), 0..3).unwrap()),
            Arc::new(crate::table::TableRange::new(source.clone(), 3..6).unwrap()),
        ];
        let group_by = parse(r#"{"type": "GroupByBuild", "fields": [0], "aggrFunField": 1}"#).unwrap();
        let partials: Vec<OperatorInput> = halves
            .into_iter()
            .map(|half| {
                OperatorInput::Index(
                    group_by
                        .execute(&ctx, &[OperatorInput::Table(half)])
                        .unwrap()
                        .into_index()
                        .unwrap(),
                )
            })
            .collect();
        let merged = parse(r#"{"type": "MergeAggregateHashMap"}"#)
            .unwrap()
            .execute(&ctx, &partials)
            .unwrap()
            .into_index()
            .unwrap();
        let merged = merged.as_aggregate_index().unwrap();
        assert_eq!(merged.aggregate(&Key::Single(0)), Some(19));
        assert_eq!(merged.aggregate(&Key::Single(1)), Some(12));
        assert_eq!(merged.aggregate(&Key::Single(2)), Some(8));
    }

    #[test]
    fn test_hash_build_and_merge() {
        let ctx = ExecutionContext::inline();
        let build = parse(r#"{"type": "HashBuild", "fields": [0], "key": "groupby"}"#).unwrap();
        let index = build
            .execute(&ctx, &[OperatorInput::Table(table())])
            .unwrap()
            .into_index()
            .unwrap();
        let merged = build
            .execute(&ctx, &[OperatorInput::Index(index.clone()), OperatorInput::Index(index)])
            .unwrap()
            .into_index()
            .unwrap();
        assert_eq!(merged.size(), 12);
        assert_eq!(merged.as_position_index().unwrap().get(&Key::Single(2)).len(), 2);
    }

    #[test]
    fn test_equi_join_operator() {
        let ctx = ExecutionContext::inline();
        let bits = RadixBits::new(1, 1).unwrap();
        let left_table = table();
        let right_table: Arc<dyn Table> =
            Arc::new(ColumnarTable::from_i64_columns(&[("g", vec![3, 1])]).unwrap());
        let left = JoinSide::partition(left_table.as_ref(), &[0], bits).unwrap();
        let right = JoinSide::partition(right_table.as_ref(), &[0], bits).unwrap();

        let join = parse(
            r#"{"type": "NestedLoopEquiJoin", "bits1": 1, "bits2": 1, "verify": true,
                "leftFields": [0], "rightFields": [0]}"#,
        )
        .unwrap();
        let positions = join
            .execute(
                &ctx,
                &[
                    OperatorInput::JoinSide(Arc::new(left)),
                    OperatorInput::JoinSide(Arc::new(right)),
                    OperatorInput::Table(left_table),
                    OperatorInput::Table(right_table),
                ],
            )
            .unwrap()
            .into_join()
            .unwrap();
        let mut pairs: Vec<_> = positions.pairs().collect();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 1), (2, 1), (4, 0), (5, 1)]);
    }

    #[test]
    fn test_registry_is_explicit() {
        let mut registry = OperatorRegistry::new();
        assert!(registry
            .parse_str(r#"{"type": "HashBuild", "fields": [0], "key": "join"}"#, &AggregateRegistry::new())
            .is_err());
        registry.register("HashBuild", parse_hash_build).unwrap();
        assert!(registry.register("HashBuild", parse_hash_build).is_err());
        assert_eq!(registry.names(), vec!["HashBuild"]);
    }
}
