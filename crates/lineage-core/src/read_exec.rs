//! Shared read execution for branch and audit scopes.
//!
//! Every read runs at the commit its action records, inside a
//! [`BranchSwitch::Detached`] sandbox, so the cached handle is back on its
//! starting branch for the next caller whatever the query does.

use dolt_state::{quote_literal, select_all_query, Table};

use crate::checkout::BranchSwitch;
use crate::domain::{Action, DoltConfig, LineageError, Result};
use crate::handle_cache::HandleCache;

/// Run `action`'s query at its recorded commit.
///
/// An action without a commit takes the config's pinned commit, which the
/// handle acquisition resolves if needed.
pub fn execute(handles: &mut HandleCache, config: &mut DoltConfig, action: &mut Action) -> Result<Table> {
    let db = handles.acquire(config)?;
    if action.commit.is_none() {
        action.commit = config.commit.clone();
    }

    let query = match (&action.query, &action.table_name) {
        (Some(query), _) => query.clone(),
        (None, Some(table)) => select_all_query(table),
        (None, None) => return Err(LineageError::MissingQuery(action.key.clone())),
    };

    match &action.commit {
        Some(commit) => BranchSwitch::detached(commit.as_str()).run(db, |db| Ok(db.sql(&query)?)),
        None => Ok(db.sql(&query)?),
    }
}

/// Row-level diff of `table` between two commits.
pub fn commit_diff_query(table: &str, from_commit: &str, to_commit: &str) -> String {
    format!(
        "SELECT * FROM `dolt_commit_diff_{table}` WHERE from_commit = {} AND to_commit = {}",
        quote_literal(from_commit),
        quote_literal(to_commit)
    )
}
