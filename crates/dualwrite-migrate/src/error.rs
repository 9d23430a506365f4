//! Error types for the dual-write migration library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for store (connection, query, pool) errors.
pub const EXIT_STORE_ERROR: u8 = 2;
/// Exit code for validation or repair failures.
pub const EXIT_REPAIR_ERROR: u8 = 3;
/// Exit code for filesystem errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code when the operation was cancelled by a signal.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, unknown pattern, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL query or connection error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL or SQLite error reported by sqlx
    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A single-row query matched nothing
    #[error("No rows in result set")]
    NoRows,

    /// Operation that cannot be expressed across two backing stores
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Commit or rollback called on a transaction that already finished
    #[error("Transaction has already been committed or rolled back")]
    TransactionDone,

    /// A column could not be decoded into the requested type
    #[error("Cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// Event sink rejected an inconsistency event
    #[error("Failed to publish inconsistency event: {0}")]
    Publish(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),

    /// Operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Decode error for a named column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether this error means "the query matched no rows".
    pub fn is_no_rows(&self) -> bool {
        matches!(
            self,
            MigrateError::NoRows | MigrateError::Sqlx(sqlx::Error::RowNotFound)
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Unsupported(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Postgres(_)
            | MigrateError::Sqlx(_)
            | MigrateError::Pool { .. }
            | MigrateError::NoRows
            | MigrateError::TransactionDone => EXIT_STORE_ERROR,
            MigrateError::Decode { .. }
            | MigrateError::Publish(_)
            | MigrateError::Json(_)
            | MigrateError::Task(_) => {
                EXIT_REPAIR_ERROR
            }
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
