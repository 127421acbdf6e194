//! Error types for table rebuilds and database handle operations.
//!
//! Rebuild failures fall into four groups. [`Validation`](RebuildError::Validation)
//! and [`Structural`](RebuildError::Structural) are raised before anything is
//! changed. [`Engine`](RebuildError::Engine) and
//! [`Cancelled`](RebuildError::Cancelled) happen inside the rebuild checkpoint
//! and always come with a full rollback. Dependent objects that could not be
//! restored are not errors; they are listed in the
//! [`RebuildOutcome`](crate::RebuildOutcome).

use schema_rebuild_core::ConstraintKind;
use thiserror::Error;

/// Errors that can occur while inspecting or changing a database.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// Existing data is incompatible with a newly added constraint.
    #[error("{kind} check failed: {detail}")]
    Validation { kind: ConstraintKind, detail: String },

    /// The requested change can never be carried out on this table.
    #[error("structural error: {0}")]
    Structural(String),

    /// SQLite rejected a statement during the destructive phase. The message
    /// is the engine's own.
    #[error("{step} failed: {message}")]
    Engine { step: &'static str, message: String },

    /// SQLite failure outside the destructive phase.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    /// The rebuild was cancelled between copy batches and rolled back.
    #[error("rebuild cancelled")]
    Cancelled,

    /// Unknown restore point name.
    #[error("no restore point named '{0}'")]
    RestorePoint(String),

    /// `foreign_key_check` reported violations while writing changes.
    #[error("foreign key violations: {0}")]
    ForeignKeyViolation(String),

    /// Pragma names are interpolated into SQL and must be plain words.
    #[error("invalid pragma name '{0}': must contain only alphanumeric characters and underscores")]
    InvalidPragma(String),

    /// File is missing the SQLite 3 header.
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl RebuildError {
    /// Returns `true` if the error was raised before the database was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Structural(_)
                | Self::TableNotFound(_)
                | Self::ColumnNotFound { .. }
        )
    }
}

/// Convenience alias for results with [`RebuildError`].
pub type Result<T> = std::result::Result<T, RebuildError>;
