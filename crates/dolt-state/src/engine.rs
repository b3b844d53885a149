//! Engine trait definitions for dolt-lineage
//!
//! These traits define the versioned-database capabilities the lineage
//! layer consumes:
//! - `DbConnector`: initialize and open databases by directory
//! - `VersionedDb`: one live handle (checkout, status, SQL, import, commit)
//!
//! Both are synchronous; every call blocks until the engine answers. An
//! in-memory implementation is provided for testing via the `fakes` module.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::table::Table;
use crate::Result;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// A named branch and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub hash: String,
}

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub committer: String,
    pub message: String,
    /// Commit date as reported by the engine
    pub date: String,
}

/// Uncommitted state of the working set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingStatus {
    /// Tables with staged or unstaged changes
    pub changed_tables: Vec<String>,
}

impl WorkingStatus {
    pub fn is_clean(&self) -> bool {
        self.changed_tables.is_empty()
    }
}

/// How a table import treats existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Create a new table; fails if it exists
    Create,
    /// Upsert rows into an existing table by primary key
    Update,
}

impl ImportMode {
    /// Flag understood by `dolt table import`.
    pub fn flag(self) -> &'static str {
        match self {
            ImportMode::Create => "-c",
            ImportMode::Update => "-u",
        }
    }
}

/// Result of an idempotent init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyInitialized,
}

// ---------------------------------------------------------------------------
// VersionedDb — one live database handle
// ---------------------------------------------------------------------------

/// A live handle on one versioned database directory.
///
/// Guarantees:
/// - `head()` is the commit the active branch points at.
/// - `sql()` reads the working set of the active branch.
/// - `commit()` records exactly the tables previously passed to `add()`.
pub trait VersionedDb: Send {
    /// Directory holding the database.
    fn repo_dir(&self) -> &Path;

    /// Name of the checked-out branch.
    fn active_branch(&self) -> Result<String>;

    /// All local branches.
    fn branches(&self) -> Result<Vec<BranchInfo>>;

    /// Switch to an existing branch.
    fn checkout(&mut self, branch: &str) -> Result<()>;

    /// Create `name` at `start_point` and switch to it.
    fn create_branch(&mut self, name: &str, start_point: &str) -> Result<()>;

    /// Force-delete a branch that is not checked out.
    fn delete_branch(&mut self, name: &str) -> Result<()>;

    /// Uncommitted changes in the working set.
    fn status(&self) -> Result<WorkingStatus>;

    /// Commit hash of the active branch.
    fn head(&self) -> Result<String>;

    /// Run a query and return its rows.
    fn sql(&self, query: &str) -> Result<Table>;

    /// Tables present in the working set.
    fn tables(&self) -> Result<Vec<String>>;

    /// Import `data` into `table`, keyed by `primary_keys`.
    fn import_table(
        &mut self,
        table: &str,
        data: &Table,
        mode: ImportMode,
        primary_keys: &[String],
    ) -> Result<()>;

    /// Write a table to a CSV file.
    fn export_csv(&self, table: &str, path: &Path) -> Result<()>;

    /// Stage tables for the next commit.
    fn add(&mut self, tables: &[String]) -> Result<()>;

    /// Commit staged tables on the active branch.
    fn commit(&mut self, message: &str, allow_empty: bool) -> Result<()>;

    /// Ancestry of HEAD, newest first.
    fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>>;

    /// Look up any commit in the database by hash.
    fn find_commit(&self, hash: &str) -> Result<Option<CommitInfo>>;

    /// Tables whose data or schema changed in `commit`.
    fn changed_tables(&self, commit: &str) -> Result<Vec<String>>;

    /// Push a branch to a remote.
    fn push(&mut self, remote: &str, branch: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DbConnector — database discovery
// ---------------------------------------------------------------------------

/// Opens handles on database directories.
pub trait DbConnector: Send + Sync {
    /// Initialize `path` as a database. Already-initialized is not an error.
    fn init(&self, path: &Path) -> Result<InitOutcome>;

    /// Whether `path` is an initialized database directory.
    fn is_database(&self, path: &Path) -> bool;

    /// Open a handle on an initialized database.
    fn open(&self, path: &Path) -> Result<Box<dyn VersionedDb>>;
}

/// Escape a string literal for inclusion in a single-quoted SQL string.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_status_clean_when_no_changes() {
        assert!(WorkingStatus::default().is_clean());
        let dirty = WorkingStatus {
            changed_tables: vec!["bar".to_string()],
        };
        assert!(!dirty.is_clean());
    }

    #[test]
    fn import_mode_flags() {
        assert_eq!(ImportMode::Create.flag(), "-c");
        assert_eq!(ImportMode::Update.flag(), "-u");
    }

    #[test]
    fn quoting_escapes_delimiters() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }
}
