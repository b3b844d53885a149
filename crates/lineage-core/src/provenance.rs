//! Commit provenance: which unit of work produced a table version.
//!
//! Scope commits carry `Run: <pathspec>` as their message, so a commit
//! that touched a table can be traced back to the step that wrote it.

use dolt_state::{DoltError, VersionedDb};

use crate::domain::{LineageError, Result};

const RUN_PREFIX: &str = "Run: ";

/// Commit message for a scope commit.
pub fn commit_message(pathspec: &str) -> String {
    format!("{RUN_PREFIX}{pathspec}")
}

/// Pathspec embedded in a scope commit message, if it is one.
pub fn parse_run_message(message: &str) -> Option<&str> {
    message
        .trim()
        .strip_prefix(RUN_PREFIX)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Pathspec of the unit of work that wrote `table` at `commit`, or at the
/// head of `branch` when no commit is given.
pub fn trace_unit(
    db: &dyn VersionedDb,
    table: &str,
    branch: &str,
    commit: Option<&str>,
) -> Result<String> {
    let commit = match commit {
        Some(c) => c.to_string(),
        None => db
            .branches()?
            .into_iter()
            .find(|b| b.name == branch)
            .map(|b| b.hash)
            .ok_or_else(|| LineageError::BranchNotFound {
                branch: branch.to_string(),
            })?,
    };

    if !db.changed_tables(&commit)?.iter().any(|t| t == table) {
        return Err(LineageError::TableNotChanged {
            table: table.to_string(),
            commit,
        });
    }

    let info = db
        .find_commit(&commit)?
        .ok_or_else(|| DoltError::CommitNotFound(commit.clone()))?;
    parse_run_message(&info.message)
        .map(str::to_string)
        .ok_or(LineageError::CommitNotFromUnit(commit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolt_state::fakes::MemoryDolt;
    use dolt_state::Table;
    use serde_json::json;

    #[test]
    fn message_round_trip() {
        let msg = commit_message("Flow/12/start/3");
        assert_eq!(msg, "Run: Flow/12/start/3");
        assert_eq!(parse_run_message(&msg), Some("Flow/12/start/3"));
        assert_eq!(parse_run_message("Update bar"), None);
        assert_eq!(parse_run_message("Run: "), None);
    }

    #[test]
    fn traces_commit_back_to_unit() {
        let dolt = MemoryDolt::new();
        let mut db = dolt.create("/trace/unit").unwrap();
        let data = Table::from_rows(["index", "A"], vec![vec![json!(0), json!(1)]]).unwrap();
        db.commit_table("seed", &data, &["index"]).unwrap();

        db.import_table("bar", &data, dolt_state::ImportMode::Create, &["index".to_string()])
            .unwrap();
        db.add(&["bar".to_string()]).unwrap();
        db.commit(&commit_message("Flow/7/train/2"), false).unwrap();

        assert_eq!(trace_unit(&db, "bar", "main", None).unwrap(), "Flow/7/train/2");

        let err = trace_unit(&db, "seed", "main", None).unwrap_err();
        assert!(matches!(err, LineageError::TableNotChanged { .. }));
    }

    #[test]
    fn foreign_commit_is_not_from_a_unit() {
        let dolt = MemoryDolt::new();
        let mut db = dolt.create("/trace/foreign").unwrap();
        let data = Table::from_rows(["index", "A"], vec![vec![json!(0), json!(1)]]).unwrap();
        let head = db.commit_table("bar", &data, &["index"]).unwrap();

        let err = trace_unit(&db, "bar", "main", Some(&head)).unwrap_err();
        assert!(matches!(err, LineageError::CommitNotFromUnit(ref c) if c == &head));

        let err = trace_unit(&db, "bar", "nope", None).unwrap_err();
        assert!(matches!(err, LineageError::BranchNotFound { .. }));
    }
}
