use std::{fmt, time::Duration};
use thiserror::Error;

/// Errors reported by the database collaborators (connector and transaction).
#[derive(Debug, Error)]
pub enum DbError {
    /// Any Postgres driver error.
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// The statement produced no rows at all.
    ///
    /// A fetch reporting this is treated as a drained cursor, not a failure.
    #[error("no rows in result set")]
    NoRows,

    /// TLS setup for the connection failed.
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The connection URL could not be parsed.
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Mapping a database row onto a buffer slot failed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot decode column '{column}': {source}")]
    Column {
        column: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("{0}")]
    Message(String),
}

/// Construction-time validation errors. No iterator is produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("connector cannot be nil")]
    MissingConnector,

    #[error("values cannot be nil")]
    MissingValues,

    #[error("values must have a capacity bigger than 0")]
    EmptyValues,

    #[error("query cannot be empty")]
    EmptyQuery,

    #[error("max database execution time must be bigger than 0")]
    ZeroExecutionTime,

    #[error("invalid cursor name: {0}")]
    InvalidCursorName(String),
}

/// Errors raised while loading a [`CursorConfig`](crate::config::CursorConfig).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// The database round trip a runtime failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Begin,
    Declare,
    Fetch,
    Rollback,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let context = match self {
            Operation::Begin => "unable to start transaction",
            Operation::Declare => "unable to declare cursor",
            Operation::Fetch => "unable to fetch rows",
            Operation::Rollback => "unable to roll back transaction",
        };
        f.write_str(context)
    }
}

/// Runtime failures recorded as the iterator's sticky error.
#[derive(Debug, Error)]
pub enum CursorError {
    /// A collaborator reported an error during `operation`.
    #[error("{operation}: {source}")]
    Database {
        operation: Operation,
        #[source]
        source: DbError,
    },

    /// `operation` did not complete within the per-operation deadline.
    #[error("{operation}: timed out after {after:?}")]
    Timeout { operation: Operation, after: Duration },

    /// The caller's cancellation token fired while `operation` was in flight.
    #[error("{operation}: cancelled")]
    Cancelled { operation: Operation },

    #[error("unable to scan into values element: {0}")]
    Decode(#[source] DecodeError),

    /// The cursor produced more rows than the `FETCH` asked for.
    #[error("database returned more rows than expected")]
    TooManyRows { expected: usize },
}

impl CursorError {
    pub fn operation(&self) -> Option<Operation> {
        match self {
            CursorError::Database { operation, .. }
            | CursorError::Timeout { operation, .. }
            | CursorError::Cancelled { operation } => Some(*operation),
            CursorError::Decode(_) | CursorError::TooManyRows { .. } => Some(Operation::Fetch),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CursorError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CursorError::Cancelled { .. })
    }

    pub(crate) fn is_no_rows(&self) -> bool {
        matches!(
            self,
            CursorError::Database {
                source: DbError::NoRows,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_messages() {
        assert_eq!(
            BuildError::MissingConnector.to_string(),
            "connector cannot be nil"
        );
        assert_eq!(BuildError::MissingValues.to_string(), "values cannot be nil");
        assert_eq!(
            BuildError::EmptyValues.to_string(),
            "values must have a capacity bigger than 0"
        );
    }

    #[test]
    fn test_runtime_errors_keep_operation_prefix() {
        let err = CursorError::Database {
            operation: Operation::Begin,
            source: DbError::Unknown("connection refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "unable to start transaction: Unknown error: connection refused"
        );

        let err = CursorError::Timeout {
            operation: Operation::Fetch,
            after: Duration::from_secs(1),
        };
        assert_eq!(err.to_string(), "unable to fetch rows: timed out after 1s");
        assert!(err.is_timeout());
        assert_eq!(err.operation(), Some(Operation::Fetch));
    }

    #[test]
    fn test_no_rows_detection() {
        let err = CursorError::Database {
            operation: Operation::Fetch,
            source: DbError::NoRows,
        };
        assert!(err.is_no_rows());
        assert!(!CursorError::TooManyRows { expected: 2 }.is_no_rows());
    }
}
