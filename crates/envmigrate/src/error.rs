//! Error types for the migration library.

use thiserror::Error;

/// Errors raised by a store adapter.
///
/// Throttling is kept apart from hard write errors so the table migrator
/// can retry the former and escalate the latter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected the request because a throughput limit was hit.
    #[error("throughput exceeded on table {table}")]
    Throttled { table: String },

    /// The write was rejected for a non-retryable reason.
    #[error("write to {table} failed: {message}")]
    Write { table: String, message: String },

    /// The store could not be reached at all.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The table does not exist in the store.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Local I/O failure (file-backed stores).
    #[error("store I/O error: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("store data error: {0}")]
    Json(String),
}

impl StoreError {
    /// Whether the operation may succeed if retried after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Throttled { .. })
    }
}

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (missing environment tags, invalid YAML, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The declared table graph contains a foreign-key cycle.
    #[error("Configuration error: dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Source or target store is unreachable.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A foreign key could not be rewritten because its target has no mapping.
    #[error(
        "Unresolved reference in {table} record {source_id}: {field} -> {target_table}"
    )]
    UnresolvedReference {
        table: String,
        source_id: String,
        field: String,
        target_table: String,
    },

    /// Writes to a table failed past the retry budget.
    #[error("Write failure for table {table}: {message}")]
    WriteFailure { table: String, message: String },

    /// Post-run validation found mismatches (auto-strict mode only).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Checkpoint file error
    #[error("Checkpoint error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since the checkpoint was written - cannot resume")]
    ConfigChanged,

    /// Live migration was not approved by the caller.
    #[error("Migration requires explicit confirmation")]
    ConfirmationRequired,

    /// Store adapter error that escaped table-level handling.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a WriteFailure error.
    pub fn write_failure(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::WriteFailure {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether this error belongs to the ConfigurationError class, which is
    /// raised before any store access.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::CyclicDependency { .. }
                | MigrateError::Yaml(_)
                | MigrateError::ConfigChanged
                | MigrateError::ConfirmationRequired
        )
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::CyclicDependency { .. }
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::ConfigChanged
            | MigrateError::ConfirmationRequired => 1,
            MigrateError::Connectivity(_) | MigrateError::Store(_) => 2,
            MigrateError::WriteFailure { .. } | MigrateError::UnresolvedReference { .. } => 3,
            MigrateError::Validation(_) => 4,
            MigrateError::Cancelled => 5,
            MigrateError::State(_) => 6,
            MigrateError::Io(_) => 7,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_tables() {
        let err = MigrateError::CyclicDependency {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(
            err.to_string(),
            "Configuration error: dependency cycle detected: A -> B -> A"
        );
        assert!(err.is_configuration());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(MigrateError::Connectivity("down".into()).exit_code(), 2);
        assert_eq!(MigrateError::write_failure("Quotes", "x").exit_code(), 3);
        assert_eq!(MigrateError::Cancelled.exit_code(), 5);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), 7);
    }

    #[test]
    fn test_only_throttling_is_retryable() {
        assert!(StoreError::Throttled { table: "T".into() }.is_retryable());
        assert!(!StoreError::Write {
            table: "T".into(),
            message: "bad".into()
        }
        .is_retryable());
        assert!(!StoreError::Unreachable("x".into()).is_retryable());
    }
}
