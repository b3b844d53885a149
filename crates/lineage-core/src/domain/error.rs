//! Error taxonomy for branch and audit scopes.

use dolt_state::DoltError;

/// Lineage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    #[error("not a versioned database directory: {path}")]
    NotADatabase { path: String },

    #[error("branch '{branch}' does not exist")]
    BranchNotFound { branch: String },

    #[error("working tree at {path} has uncommitted changes: {tables:?}")]
    DirtyWorkingTree { path: String, tables: Vec<String> },

    #[error("duplicate key attempted to override lineage state: {0}")]
    DuplicateKey(String),

    #[error("key not found in audit: {0}")]
    KeyNotFound(String),

    #[error("{operation} is not permitted in audit mode")]
    AuditModeUnsupported { operation: &'static str },

    #[error("{operation} is only permitted while a unit of work is running")]
    RuntimeOnly { operation: &'static str },

    #[error("action references unknown config: {0}")]
    UnknownConfig(String),

    #[error("specify one of: audit, config")]
    MissingScopeTarget,

    #[error("scope is closed")]
    ScopeClosed,

    #[error("action '{0}' has neither a query nor a table to read")]
    MissingQuery(String),

    #[error("table {table} was not updated at commit {commit}")]
    TableNotChanged { table: String, commit: String },

    #[error("commit {0} was not produced by a unit of work")]
    CommitNotFromUnit(String),

    #[error(transparent)]
    Engine(#[from] DoltError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lineage operations.
pub type Result<T> = std::result::Result<T, LineageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_name_their_subject() {
        let err = LineageError::BranchNotFound {
            branch: "feature".to_string(),
        };
        assert!(err.to_string().contains("feature"));

        let err = LineageError::DirtyWorkingTree {
            path: "/data/db".to_string(),
            tables: vec!["bar".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/db"));
        assert!(msg.contains("bar"));
    }

    #[test]
    fn engine_errors_pass_through_unwrapped() {
        let inner = DoltError::Sql("syntax error near FROM".to_string());
        let expected = inner.to_string();
        let err: LineageError = inner.into();
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn gate_errors_name_the_operation() {
        let err = LineageError::AuditModeUnsupported { operation: "write" };
        assert!(err.to_string().contains("write"));
        let err = LineageError::RuntimeOnly { operation: "commit" };
        assert!(err.to_string().contains("commit"));
    }
}
