//! Error types for dolt-state

use thiserror::Error;

/// Errors raised by a versioned-database engine.
#[derive(Error, Debug)]
pub enum DoltError {
    /// The engine executable could not be started
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine exited with a non-zero status
    #[error("{command} failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Engine output could not be decoded
    #[error("failed to parse engine output: {0}")]
    Parse(String),

    /// Query rejected by the engine
    #[error("SQL error: {0}")]
    Sql(String),

    /// Table does not exist at the current reference
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Branch does not exist
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Branch already exists
    #[error("branch already exists: {0}")]
    BranchExists(String),

    /// Commit does not exist
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// Path is not an initialized database
    #[error("not a database directory: {0}")]
    NotInitialized(String),

    /// Commit attempted with no staged changes and empty commits disallowed
    #[error("nothing to commit")]
    NothingToCommit,

    /// Table shape is inconsistent
    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// Filesystem error while staging or exporting data
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DoltError {
    fn from(err: serde_json::Error) -> Self {
        DoltError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display_includes_stderr() {
        let err = DoltError::CommandFailed {
            command: "dolt checkout nope".to_string(),
            code: Some(1),
            stderr: "branch not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dolt checkout nope"));
        assert!(msg.contains("branch not found"));
    }

    #[test]
    fn serde_error_maps_to_parse() {
        let err: DoltError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, DoltError::Parse(_)));
    }
}
