use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported aggregation function: {0}")]
    UnsupportedAggregate(String),

    #[error("Aggregation function {0} is not commutative and associative")]
    NonCommutativeAggregate(String),

    #[error("Shared hash build can not run without a map container")]
    MissingMap,

    #[error("Column {column} out of range for table with {columns} columns")]
    ColumnOutOfRange { column: usize, columns: usize },

    #[error("Key layout mismatch: expected {expected} key columns, got {actual}")]
    KeyMismatch { expected: usize, actual: usize },

    #[error("Invalid key range: first {first} is past last {last}")]
    InvalidRange { first: usize, last: usize },

    #[error("Partition mismatch: {0}")]
    PartitionMismatch(String),

    #[error("Row offset overflows the position space")]
    PositionOverflow,

    #[error("Build worker failed: {0}")]
    Worker(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Config(_) => -1,
            Error::UnsupportedAggregate(_) => -2,
            Error::NonCommutativeAggregate(_) => -3,
            Error::MissingMap => -4,
            Error::ColumnOutOfRange { .. } => -5,
            Error::KeyMismatch { .. } => -6,
            Error::InvalidRange { .. } => -7,
            Error::PartitionMismatch(_) => -8,
            Error::PositionOverflow => -9,
            Error::Worker(_) => -99,
        }
    }

    /// Configuration problems are detected before any work is scheduled.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::UnsupportedAggregate(_)
                | Error::NonCommutativeAggregate(_)
                | Error::ColumnOutOfRange { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
