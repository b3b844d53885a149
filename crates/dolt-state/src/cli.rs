//! Dolt CLI handle
//!
//! Drives the `dolt` executable as a subprocess inside the database
//! directory. Queries run with `-r json` and are decoded into [`Table`]s;
//! imports stage the data as a temporary CSV file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::engine::{
    quote_ident, quote_literal, BranchInfo, CommitInfo, DbConnector, ImportMode, InitOutcome,
    VersionedDb, WorkingStatus,
};
use crate::error::DoltError;
use crate::table::Table;
use crate::Result;

/// Default executable name.
pub const DEFAULT_DOLT_BIN: &str = "dolt";

/// Check whether the `dolt` executable is on `PATH`.
pub fn is_dolt_available() -> bool {
    is_dolt_available_at(Path::new(DEFAULT_DOLT_BIN))
}

/// Check whether the given executable answers `dolt version`.
pub fn is_dolt_available_at(bin: &Path) -> bool {
    Command::new(bin)
        .arg("version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn render_command(bin: &Path, args: &[&str]) -> String {
    format!("{} {}", bin.display(), args.join(" "))
}

/// Run the executable in `dir` and return its stdout.
fn run_dolt(bin: &Path, dir: &Path, args: &[&str]) -> Result<String> {
    let command = render_command(bin, args);
    debug!(command = %command, dir = %dir.display(), "invoking dolt");

    let output = Command::new(bin)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|source| DoltError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(DoltError::CommandFailed {
            command,
            code: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Render a result cell as plain text.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read one text column out of every row.
fn text_column(table: &Table, column: &str) -> Result<Vec<String>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }
    let cells = table
        .column(column)
        .ok_or_else(|| DoltError::Parse(format!("missing column {column} in engine output")))?;
    Ok(cells.into_iter().map(cell_text).collect())
}

/// Connector that opens [`DoltCli`] handles.
#[derive(Debug, Clone)]
pub struct DoltCliConnector {
    bin: PathBuf,
}

impl Default for DoltCliConnector {
    fn default() -> Self {
        Self::new(DEFAULT_DOLT_BIN)
    }
}

impl DoltCliConnector {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl DbConnector for DoltCliConnector {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn init(&self, path: &Path) -> Result<InitOutcome> {
        std::fs::create_dir_all(path)?;
        match run_dolt(&self.bin, path, &["init"]) {
            Ok(_) => Ok(InitOutcome::Created),
            Err(DoltError::CommandFailed { stderr, .. })
                if stderr.contains("already been initialized") =>
            {
                Ok(InitOutcome::AlreadyInitialized)
            }
            Err(e) => Err(e),
        }
    }

    fn is_database(&self, path: &Path) -> bool {
        path.join(".dolt").is_dir()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn VersionedDb>> {
        if !self.is_database(path) {
            return Err(DoltError::NotInitialized(path.display().to_string()));
        }
        Ok(Box::new(DoltCli::new(self.bin.clone(), path)))
    }
}

/// Subprocess-backed handle on one Dolt database directory.
#[derive(Debug, Clone)]
pub struct DoltCli {
    bin: PathBuf,
    repo_dir: PathBuf,
}

impl DoltCli {
    pub fn new(bin: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            repo_dir: repo_dir.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        run_dolt(&self.bin, &self.repo_dir, args)
    }

    fn query(&self, query: &str) -> Result<Table> {
        let stdout = self.run(&["sql", "-r", "json", "-q", query])?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Table::default());
        }
        let value: Value = serde_json::from_str(trimmed)?;
        Table::from_json_rows(&value)
    }

    fn commits_from(&self, table: &Table) -> Result<Vec<CommitInfo>> {
        let hashes = text_column(table, "commit_hash")?;
        let committers = text_column(table, "committer")?;
        let messages = text_column(table, "message")?;
        let dates = text_column(table, "date")?;
        Ok(hashes
            .into_iter()
            .zip(committers)
            .zip(messages)
            .zip(dates)
            .map(|(((hash, committer), message), date)| CommitInfo {
                hash,
                committer,
                message,
                date,
            })
            .collect())
    }
}

impl VersionedDb for DoltCli {
    fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn active_branch(&self) -> Result<String> {
        let table = self.query("SELECT active_branch() AS name")?;
        text_column(&table, "name")?
            .into_iter()
            .next()
            .ok_or_else(|| DoltError::Parse("active_branch() returned no rows".to_string()))
    }

    fn branches(&self) -> Result<Vec<BranchInfo>> {
        let table = self.query("SELECT name, hash FROM dolt_branches")?;
        let names = text_column(&table, "name")?;
        let hashes = text_column(&table, "hash")?;
        Ok(names
            .into_iter()
            .zip(hashes)
            .map(|(name, hash)| BranchInfo { name, hash })
            .collect())
    }

    fn checkout(&mut self, branch: &str) -> Result<()> {
        self.run(&["checkout", branch]).map(|_| ())
    }

    fn create_branch(&mut self, name: &str, start_point: &str) -> Result<()> {
        self.run(&["checkout", "-b", name, start_point]).map(|_| ())
    }

    fn delete_branch(&mut self, name: &str) -> Result<()> {
        self.run(&["branch", "-D", name]).map(|_| ())
    }

    fn status(&self) -> Result<WorkingStatus> {
        let table = self.query("SELECT table_name FROM dolt_status")?;
        let mut changed_tables = text_column(&table, "table_name")?;
        changed_tables.sort();
        changed_tables.dedup();
        Ok(WorkingStatus { changed_tables })
    }

    fn head(&self) -> Result<String> {
        let table = self.query("SELECT hashof('HEAD') AS hash")?;
        text_column(&table, "hash")?
            .into_iter()
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DoltError::Parse("hashof('HEAD') returned no rows".to_string()))
    }

    fn sql(&self, query: &str) -> Result<Table> {
        self.query(query)
    }

    fn tables(&self) -> Result<Vec<String>> {
        let table = self.query("SHOW TABLES")?;
        Ok(table
            .rows()
            .iter()
            .filter_map(|row| row.first())
            .map(cell_text)
            .collect())
    }

    #[instrument(skip(self, data), fields(rows = data.len()))]
    fn import_table(
        &mut self,
        table: &str,
        data: &Table,
        mode: ImportMode,
        primary_keys: &[String],
    ) -> Result<()> {
        let mut staging = tempfile::Builder::new()
            .prefix("dolt-import-")
            .suffix(".csv")
            .tempfile()?;
        staging.write_all(data.to_csv().as_bytes())?;
        staging.flush()?;

        let path = staging.path().display().to_string();
        let pks = primary_keys.join(",");
        let mut args = vec!["table", "import", mode.flag()];
        if !primary_keys.is_empty() {
            args.push("--pk");
            args.push(&pks);
        }
        args.push(table);
        args.push(&path);
        self.run(&args).map(|_| ())
    }

    fn export_csv(&self, table: &str, path: &Path) -> Result<()> {
        let target = path.display().to_string();
        self.run(&["table", "export", "-f", "--file-type", "csv", table, &target])
            .map(|_| ())
    }

    fn add(&mut self, tables: &[String]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add"];
        args.extend(tables.iter().map(String::as_str));
        self.run(&args).map(|_| ())
    }

    fn commit(&mut self, message: &str, allow_empty: bool) -> Result<()> {
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args).map(|_| ())
    }

    fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        let mut query = "SELECT commit_hash, committer, message, date FROM dolt_log".to_string();
        if let Some(n) = limit {
            query.push_str(&format!(" LIMIT {n}"));
        }
        let table = self.query(&query)?;
        self.commits_from(&table)
    }

    fn find_commit(&self, hash: &str) -> Result<Option<CommitInfo>> {
        let table = self.query(&format!(
            "SELECT commit_hash, committer, message, date FROM dolt_commits WHERE commit_hash = {}",
            quote_literal(hash)
        ))?;
        Ok(self.commits_from(&table)?.into_iter().next())
    }

    fn changed_tables(&self, commit: &str) -> Result<Vec<String>> {
        let table = self.query(&format!(
            "SELECT table_name FROM dolt_diff WHERE commit_hash = {}",
            quote_literal(commit)
        ))?;
        text_column(&table, "table_name")
    }

    fn push(&mut self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", remote, branch]).map(|_| ())
    }
}

/// `SELECT *` over a table, the canonical read query.
pub fn select_all_query(table: &str) -> String {
    format!("SELECT * FROM {}", quote_ident(table))
}
