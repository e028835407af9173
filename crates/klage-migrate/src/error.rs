use klage_db_schema::ConfigurationError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Structured classification of a database failure.
///
/// Control flow only ever looks at the kind; the message is for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The column, index or constraint already exists.
    DuplicateObject,
    /// The column, index or constraint does not exist.
    UndefinedObject,
    /// The table does not exist.
    UndefinedTable,
    Other,
}

/// A failure reported by the database, with the driver's message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
    /// SQLSTATE, when the failure came from the server.
    pub code: Option<String>,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Other, message)
    }
}

/// Reading a table's structure failed. Aborts reconciliation for that table only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to inspect table {table}: {source}")]
pub struct InspectionError {
    pub table: String,
    #[source]
    pub source: DbError,
}

/// A single structural change failed. Recorded per action, never fatal to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub code: Option<String>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

impl From<DbError> for ExecutionError {
    fn from(err: DbError) -> Self {
        Self {
            message: err.message,
            code: err.code,
        }
    }
}

impl From<InspectionError> for ExecutionError {
    fn from(err: InspectionError) -> Self {
        Self {
            message: err.to_string(),
            code: err.source.code,
        }
    }
}

/// Why the safety guard refused a destructive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    SystemColumn,
    PrimaryKey,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::SystemColumn => write!(f, "system column"),
            DenyReason::PrimaryKey => write!(f, "primary key"),
        }
    }
}

/// An operator request refused by the safety guard. A refusal, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("refused to change {target} on {table}: {reason}")]
pub struct GuardDenied {
    pub table: String,
    pub target: String,
    pub reason: DenyReason,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Inspection(#[from] InspectionError),

    #[error("schema change failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Denied(#[from] GuardDenied),

    #[error("invalid catalog: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("advisory lock {key} still held by another session after {waited:?}")]
    LockTimeout { key: i64, waited: Duration },

    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("table {table} has no column {column}")]
    ColumnNotFound { table: String, column: String },

    #[error("table {table} has no index {index}")]
    IndexNotFound { table: String, index: String },
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Error::Database(err.into())
    }
}
