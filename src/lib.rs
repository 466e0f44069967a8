pub mod aggregate;
pub mod config;
pub mod error;
pub mod hash_index;
pub mod join;
pub mod logging;
pub mod operators;
pub mod scheduler;
pub mod table;

pub use aggregate::{
    AggregateFunction, AggregateHashMap, AggregateRegistry, AtomicAggregateTable, Count, Max, Min,
    Sum,
};
pub use config::{AggregateSpec, GroupByConfig, HashBuildConfig, JoinProbeConfig, SharedBuildConfig};
pub use error::{Error, Result};
pub use hash_index::{
    AggregateIndex, BuiltIndex, HashIndex, HashTable, HashTableView, Key, KeyExtractor, KeyKind,
    MapStrategy, Position, PositionIndex, PositionList, SharedHashTable,
};
pub use join::{verify_exact, EquiJoinProbe, JoinPositions, JoinSide, PrefixSumTable, RadixBits};
pub use operators::{ExecutionContext, Operator, OperatorInput, OperatorOutput, OperatorRegistry};
pub use scheduler::{InlineScheduler, RayonScheduler, TaskScheduler};
pub use table::{ColumnarTable, ColumnarTableBuilder, DataType, Table, TableRange, Value};
