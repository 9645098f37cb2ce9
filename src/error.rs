use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StashErrorCode {
    Io,
    Encode,
    Decode,
    Validation,
    InvalidConfig,
    IntegrityError,
    Capability,
    TableNotFound,
    DuplicateKey,
    UniqueViolation,
    StoreClosed,
    QueueFull,
    PoolClosed,
    WorkerLost,
    Boundary,
}

impl StashErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StashErrorCode::Io => "io",
            StashErrorCode::Encode => "encode",
            StashErrorCode::Decode => "decode",
            StashErrorCode::Validation => "validation",
            StashErrorCode::InvalidConfig => "invalid_config",
            StashErrorCode::IntegrityError => "integrity_error",
            StashErrorCode::Capability => "capability",
            StashErrorCode::TableNotFound => "table_not_found",
            StashErrorCode::DuplicateKey => "duplicate_key",
            StashErrorCode::UniqueViolation => "unique_violation",
            StashErrorCode::StoreClosed => "store_closed",
            StashErrorCode::QueueFull => "queue_full",
            StashErrorCode::PoolClosed => "pool_closed",
            StashErrorCode::WorkerLost => "worker_lost",
            StashErrorCode::Boundary => "boundary",
        }
    }

    /// Storage errors reject the caller's future; everything else is a
    /// dispatch or boundary outcome.
    pub fn is_storage(self) -> bool {
        matches!(
            self,
            StashErrorCode::Io
                | StashErrorCode::Encode
                | StashErrorCode::Decode
                | StashErrorCode::Validation
                | StashErrorCode::IntegrityError
                | StashErrorCode::TableNotFound
                | StashErrorCode::DuplicateKey
                | StashErrorCode::UniqueViolation
                | StashErrorCode::StoreClosed
        )
    }
}

impl std::fmt::Display for StashErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StashError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("integrity error: {message}")]
    IntegrityError { message: String },
    #[error("capability error: {0}")]
    Capability(String),
    #[error("table '{table}' not found")]
    TableNotFound { table: String },
    #[error("duplicate key in table '{table}': {key}")]
    DuplicateKey { table: String, key: String },
    #[error("unique constraint violation on index '{index}' in table '{table}': {key}")]
    UniqueViolation {
        table: String,
        index: String,
        key: String,
    },
    #[error("store '{name}' is closed")]
    StoreClosed { name: String },
    #[error("queue full")]
    QueueFull,
    #[error("pool closed")]
    PoolClosed,
    #[error("worker {worker_id} exited before responding")]
    WorkerLost { worker_id: usize },
    #[error("worker boundary error: {message}")]
    Boundary { message: String },
    /// An error raised inside a worker and carried back across the boundary.
    #[error("{message}")]
    Remote {
        code: StashErrorCode,
        message: String,
    },
}

impl StashError {
    pub fn code(&self) -> StashErrorCode {
        match self {
            StashError::Io(_) => StashErrorCode::Io,
            StashError::Encode(_) => StashErrorCode::Encode,
            StashError::Decode(_) => StashErrorCode::Decode,
            StashError::Validation(_) => StashErrorCode::Validation,
            StashError::InvalidConfig { .. } => StashErrorCode::InvalidConfig,
            StashError::IntegrityError { .. } => StashErrorCode::IntegrityError,
            StashError::Capability(_) => StashErrorCode::Capability,
            StashError::TableNotFound { .. } => StashErrorCode::TableNotFound,
            StashError::DuplicateKey { .. } => StashErrorCode::DuplicateKey,
            StashError::UniqueViolation { .. } => StashErrorCode::UniqueViolation,
            StashError::StoreClosed { .. } => StashErrorCode::StoreClosed,
            StashError::QueueFull => StashErrorCode::QueueFull,
            StashError::PoolClosed => StashErrorCode::PoolClosed,
            StashError::WorkerLost { .. } => StashErrorCode::WorkerLost,
            StashError::Boundary { .. } => StashErrorCode::Boundary,
            StashError::Remote { code, .. } => *code,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

impl From<rmp_serde::encode::Error> for StashError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StashError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StashError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StashError::Decode(err.to_string())
    }
}

/// Wire form of a [`StashError`]: what a worker posts back when a request
/// fails with an error rather than a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: StashErrorCode,
    pub message: String,
}

impl From<&StashError> for RemoteError {
    fn from(err: &StashError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for StashError {
    fn from(err: RemoteError) -> Self {
        StashError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}
