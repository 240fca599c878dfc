//! Error types for pgbatch

use thiserror::Error;

/// Result type alias for pgbatch operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Error types for batch operations
#[derive(Debug, Error)]
pub enum BatchError {
    /// The caller broke the batch contract (empty batch, missing unique_by
    /// columns, nothing to return from a select, ...). Raised before any SQL
    /// is rendered.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A referenced column does not exist in the table metadata.
    #[error("Unknown column '{column}' for table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Malformed identifier or SQL type name
    #[error("Validation error: {0}")]
    Validation(String),

    /// Query execution error, passed through from the database.
    ///
    /// `sql` carries the rendered statement when diagnostics are enabled.
    #[error("Query error: {source}")]
    Query {
        #[source]
        source: tokio_postgres::Error,
        sql: Option<String>,
    },

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),
}

impl BatchError {
    /// Create an input contract error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create an unknown column error
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Check if this is an input contract error
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Check if this is a metadata error
    pub fn is_unknown_column(&self) -> bool {
        matches!(self, Self::UnknownColumn { .. })
    }

    /// Check if this error came from executing the statement
    pub fn is_execution(&self) -> bool {
        match self {
            Self::Query { .. } | Self::Connection(_) => true,
            #[cfg(feature = "pool")]
            Self::Pool(_) => true,
            _ => false,
        }
    }

    /// The SQL attached to an execution error, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Attach the rendered SQL to an execution error.
    ///
    /// Other variants are returned unchanged, so the classification never
    /// changes.
    pub fn with_sql(self, statement: &str) -> Self {
        match self {
            Self::Query { source, .. } => Self::Query {
                source,
                sql: Some(statement.to_string()),
            },
            other => other,
        }
    }
}

impl From<tokio_postgres::Error> for BatchError {
    fn from(source: tokio_postgres::Error) -> Self {
        Self::Query { source, sql: None }
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for BatchError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
