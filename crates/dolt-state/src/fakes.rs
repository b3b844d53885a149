//! In-memory fakes for engine traits (testing only)
//!
//! Provides `MemoryDolt`, a [`DbConnector`] whose handles satisfy the
//! [`VersionedDb`] contract without the `dolt` executable. Repositories are
//! shared across handles by directory path, so a test can seed a database,
//! hand the connector to the code under test, and inspect the result.
//!
//! The SQL surface is limited to what the lineage layer issues:
//! - `SELECT * FROM <table> [LIMIT n]`
//! - `SELECT * FROM dolt_commit_diff_<table> WHERE from_commit = '<a>' AND to_commit = '<b>'`
//!   (the `dolt_diff_<table>` spelling is accepted too)

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::engine::*;
use crate::error::DoltError;
use crate::table::Table;
use crate::Result;

const FAKE_COMMITTER: &str = "memory-dolt";

#[derive(Debug, Clone, PartialEq)]
struct StoredTable {
    data: Table,
    primary_key: Vec<String>,
}

type Snapshot = BTreeMap<String, StoredTable>;

#[derive(Debug, Clone)]
struct CommitEntry {
    info: CommitInfo,
    parent: Option<String>,
    snapshot: Snapshot,
}

#[derive(Debug, Clone)]
struct BranchState {
    head: String,
    working: Snapshot,
    staged: Snapshot,
}

#[derive(Debug)]
struct RepoState {
    commits: HashMap<String, CommitEntry>,
    branches: BTreeMap<String, BranchState>,
    active: String,
    sequence: u64,
    pushes: Vec<(String, String)>,
}

impl RepoState {
    fn new(default_branch: &str) -> Self {
        let mut repo = RepoState {
            commits: HashMap::new(),
            branches: BTreeMap::new(),
            active: default_branch.to_string(),
            sequence: 0,
            pushes: Vec::new(),
        };
        let root = repo.record_commit(None, "Initialize data repository", Snapshot::new());
        repo.branches.insert(
            default_branch.to_string(),
            BranchState {
                head: root,
                working: Snapshot::new(),
                staged: Snapshot::new(),
            },
        );
        repo
    }

    fn record_commit(&mut self, parent: Option<String>, message: &str, snapshot: Snapshot) -> String {
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(parent.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(message.as_bytes());
        let hash = hex::encode(hasher.finalize())[..32].to_string();

        self.commits.insert(
            hash.clone(),
            CommitEntry {
                info: CommitInfo {
                    hash: hash.clone(),
                    committer: FAKE_COMMITTER.to_string(),
                    message: message.to_string(),
                    date: Utc::now().to_rfc3339(),
                },
                parent,
                snapshot,
            },
        );
        hash
    }

    fn branch(&self) -> Result<&BranchState> {
        self.branches
            .get(&self.active)
            .ok_or_else(|| DoltError::BranchNotFound(self.active.clone()))
    }

    fn branch_mut(&mut self) -> Result<&mut BranchState> {
        let active = self.active.clone();
        self.branches
            .get_mut(&active)
            .ok_or(DoltError::BranchNotFound(active))
    }

    fn snapshot(&self, commit: &str) -> Result<&Snapshot> {
        self.commits
            .get(commit)
            .map(|c| &c.snapshot)
            .ok_or_else(|| DoltError::CommitNotFound(commit.to_string()))
    }

    fn head_snapshot(&self) -> Result<&Snapshot> {
        let head = self.branch()?.head.clone();
        self.snapshot(&head)
    }

    /// A branch name or a commit hash, resolved to a commit hash.
    fn resolve(&self, reference: &str) -> Result<String> {
        if let Some(branch) = self.branches.get(reference) {
            return Ok(branch.head.clone());
        }
        if self.commits.contains_key(reference) {
            return Ok(reference.to_string());
        }
        Err(DoltError::CommitNotFound(reference.to_string()))
    }

    fn status(&self) -> Result<WorkingStatus> {
        let branch = self.branch()?;
        let head = self.head_snapshot()?;
        let mut changed: Vec<String> = Vec::new();
        for snap in [&branch.working, &branch.staged] {
            for name in snap.keys().chain(head.keys()) {
                if snap.get(name) != head.get(name) && !changed.contains(name) {
                    changed.push(name.clone());
                }
            }
        }
        changed.sort();
        Ok(WorkingStatus {
            changed_tables: changed,
        })
    }

    fn ancestry(&self, from: &str) -> Vec<CommitInfo> {
        let mut out = Vec::new();
        let mut cursor = Some(from.to_string());
        while let Some(hash) = cursor {
            match self.commits.get(&hash) {
                Some(entry) => {
                    out.push(entry.info.clone());
                    cursor = entry.parent.clone();
                }
                None => break,
            }
        }
        out
    }

    fn import(
        &mut self,
        table: &str,
        data: &Table,
        mode: ImportMode,
        primary_keys: &[String],
    ) -> Result<()> {
        for key in primary_keys {
            if data.column_index(key).is_none() {
                return Err(DoltError::Sql(format!(
                    "primary key column {key} not present in import data"
                )));
            }
        }
        let working = &mut self.branch_mut()?.working;
        match mode {
            ImportMode::Create => {
                if working.contains_key(table) {
                    return Err(DoltError::Sql(format!("table {table} already exists")));
                }
                if primary_keys.is_empty() {
                    return Err(DoltError::Sql(
                        "a primary key is required when creating a table".to_string(),
                    ));
                }
                working.insert(
                    table.to_string(),
                    StoredTable {
                        data: data.clone(),
                        primary_key: primary_keys.to_vec(),
                    },
                );
            }
            ImportMode::Update => {
                let stored = working
                    .get_mut(table)
                    .ok_or_else(|| DoltError::TableNotFound(table.to_string()))?;
                upsert(stored, data)?;
            }
        }
        Ok(())
    }

    fn query(&self, query: &str) -> Result<Table> {
        if let Some(caps) = diff_pattern().captures(query) {
            return self.diff(&caps[1], &caps[2], &caps[3]);
        }
        if let Some(caps) = select_pattern().captures(query) {
            let name = &caps[1];
            let stored = self
                .branch()?
                .working
                .get(name)
                .ok_or_else(|| DoltError::TableNotFound(name.to_string()))?;
            let mut rows = stored.data.rows().to_vec();
            if let Some(limit) = caps.get(2) {
                let n: usize = limit
                    .as_str()
                    .parse()
                    .map_err(|_| DoltError::Sql(format!("bad LIMIT in: {query}")))?;
                rows.truncate(n);
            }
            return Table::from_rows(stored.data.columns().to_vec(), rows);
        }
        Err(DoltError::Sql(format!(
            "query not supported by the in-memory engine: {query}"
        )))
    }

    fn diff(&self, table: &str, from: &str, to: &str) -> Result<Table> {
        let from_table = self.snapshot(&self.resolve(from)?)?.get(table);
        let to_table = self.snapshot(&self.resolve(to)?)?.get(table);
        if from_table.is_none() && to_table.is_none() {
            return Err(DoltError::TableNotFound(table.to_string()));
        }
        let primary_key = to_table
            .or(from_table)
            .map(|t| t.primary_key.clone())
            .unwrap_or_default();

        let empty = StoredTable {
            data: Table::default(),
            primary_key: primary_key.clone(),
        };
        let from_table = from_table.unwrap_or(&empty);
        let to_table = to_table.unwrap_or(&empty);

        let mut columns = Vec::new();
        columns.extend(to_table.data.columns().iter().map(|c| format!("to_{c}")));
        columns.push("to_commit".to_string());
        columns.extend(from_table.data.columns().iter().map(|c| format!("from_{c}")));
        columns.push("from_commit".to_string());
        columns.push("diff_type".to_string());

        let from_rows = keyed_rows(&from_table.data, &primary_key);
        let to_rows = keyed_rows(&to_table.data, &primary_key);
        let to_nulls = vec![Value::Null; to_table.data.columns().len()];
        let from_nulls = vec![Value::Null; from_table.data.columns().len()];

        let mut out = Table::new(columns);
        let row = |to_cells: &[Value], from_cells: &[Value], kind: &str| {
            let mut cells = to_cells.to_vec();
            cells.push(Value::from(to));
            cells.extend(from_cells.iter().cloned());
            cells.push(Value::from(from));
            cells.push(Value::from(kind));
            cells
        };

        for (key, to_cells) in &to_rows {
            match from_rows.iter().find(|(k, _)| k == key) {
                Some((_, from_cells)) if from_cells != to_cells => {
                    out.push_row(row(to_cells.as_slice(), from_cells.as_slice(), "modified"))?
                }
                Some(_) => {}
                None => out.push_row(row(to_cells.as_slice(), from_nulls.as_slice(), "added"))?,
            }
        }
        for (key, from_cells) in &from_rows {
            if !to_rows.iter().any(|(k, _)| k == key) {
                out.push_row(row(to_nulls.as_slice(), from_cells.as_slice(), "removed"))?;
            }
        }
        Ok(out)
    }
}

/// Rows keyed by the rendered primary-key cells, in table order.
fn keyed_rows(table: &Table, primary_key: &[String]) -> Vec<(String, Vec<Value>)> {
    let idx: Vec<usize> = primary_key
        .iter()
        .filter_map(|k| table.column_index(k))
        .collect();
    table
        .rows()
        .iter()
        .map(|row| {
            let key = idx
                .iter()
                .map(|&i| row[i].to_string())
                .collect::<Vec<_>>()
                .join("\u{1f}");
            (key, row.clone())
        })
        .collect()
}

/// Merge `incoming` rows into `stored`, replacing rows with equal keys.
fn upsert(stored: &mut StoredTable, incoming: &Table) -> Result<()> {
    let columns = stored.data.columns().to_vec();
    let mut rows = stored.data.rows().to_vec();
    let key_idx: Vec<usize> = stored
        .primary_key
        .iter()
        .filter_map(|k| stored.data.column_index(k))
        .collect();

    for i in 0..incoming.len() {
        let map = incoming.row_map(i).unwrap_or_default();
        let aligned: Vec<Value> = columns
            .iter()
            .map(|c| map.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        let existing = rows
            .iter()
            .position(|r| key_idx.iter().all(|&k| r[k] == aligned[k]));
        match existing {
            Some(pos) => rows[pos] = aligned,
            None => rows.push(aligned),
        }
    }

    stored.data = Table::from_rows(columns, rows)?;
    Ok(())
}

fn select_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^\s*select\s+\*\s+from\s+`?([A-Za-z0-9_]+)`?(?:\s+limit\s+(\d+))?\s*;?\s*$")
            .expect("select pattern is valid")
    })
}

fn diff_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*select\s+\*\s+from\s+`?dolt_(?:commit_)?diff_([A-Za-z0-9_]+)`?\s+where\s+from_commit\s*=\s*'([^']*)'\s+and\s+to_commit\s*=\s*'([^']*)'\s*;?\s*$",
        )
        .expect("diff pattern is valid")
    })
}

// ---------------------------------------------------------------------------
// MemoryDolt
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Shared {
    repos: HashMap<PathBuf, RepoState>,
    refused: HashSet<PathBuf>,
    init_calls: usize,
    open_calls: usize,
}

/// In-memory connector backed by a `HashMap<path, repository>`.
#[derive(Debug, Clone)]
pub struct MemoryDolt {
    shared: Arc<Mutex<Shared>>,
    default_branch: String,
}

impl Default for MemoryDolt {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDolt {
    /// New connector whose repositories start on `main`.
    pub fn new() -> Self {
        Self::with_default_branch("main")
    }

    pub fn with_default_branch(branch: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            default_branch: branch.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `init` fail for `path`, as if the directory were unwritable.
    pub fn refuse_init(&self, path: impl Into<PathBuf>) {
        self.lock().refused.insert(path.into());
    }

    /// Number of `init` calls made through the connector.
    pub fn init_calls(&self) -> usize {
        self.lock().init_calls
    }

    /// Number of `open` calls made through the connector.
    pub fn open_calls(&self) -> usize {
        self.lock().open_calls
    }

    /// Handle for seeding or inspecting a repository; not counted by `open_calls`.
    pub fn handle(&self, path: impl Into<PathBuf>) -> Result<MemoryHandle> {
        let path = path.into();
        if !self.lock().repos.contains_key(&path) {
            return Err(DoltError::NotInitialized(path.display().to_string()));
        }
        Ok(MemoryHandle {
            path,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Initialize `path` and return a seeding handle.
    pub fn create(&self, path: impl Into<PathBuf>) -> Result<MemoryHandle> {
        let path = path.into();
        {
            let mut shared = self.lock();
            if !shared.repos.contains_key(&path) {
                shared
                    .repos
                    .insert(path.clone(), RepoState::new(&self.default_branch));
            }
        }
        self.handle(path)
    }

    /// Number of commits reachable from the active branch of `path`.
    pub fn commit_count(&self, path: &Path) -> usize {
        let shared = self.lock();
        shared
            .repos
            .get(path)
            .and_then(|repo| repo.branch().ok().map(|b| repo.ancestry(&b.head).len()))
            .unwrap_or(0)
    }

    /// `(remote, branch)` pairs pushed from `path`.
    pub fn pushes(&self, path: &Path) -> Vec<(String, String)> {
        self.lock()
            .repos
            .get(path)
            .map(|r| r.pushes.clone())
            .unwrap_or_default()
    }
}

impl DbConnector for MemoryDolt {
    fn init(&self, path: &Path) -> Result<InitOutcome> {
        let mut shared = self.lock();
        shared.init_calls += 1;
        if shared.refused.contains(path) {
            return Err(DoltError::CommandFailed {
                command: "dolt init".to_string(),
                code: Some(1),
                stderr: format!("permission denied: {}", path.display()),
            });
        }
        if shared.repos.contains_key(path) {
            return Ok(InitOutcome::AlreadyInitialized);
        }
        shared
            .repos
            .insert(path.to_path_buf(), RepoState::new(&self.default_branch));
        Ok(InitOutcome::Created)
    }

    fn is_database(&self, path: &Path) -> bool {
        self.lock().repos.contains_key(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn VersionedDb>> {
        self.lock().open_calls += 1;
        Ok(Box::new(self.handle(path)?))
    }
}

/// Handle on one in-memory repository.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    path: PathBuf,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryHandle {
    fn with_repo<T>(&self, f: impl FnOnce(&mut RepoState) -> Result<T>) -> Result<T> {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let repo = shared
            .repos
            .get_mut(&self.path)
            .ok_or_else(|| DoltError::NotInitialized(self.path.display().to_string()))?;
        f(repo)
    }

    /// Import, stage and commit one table in a single step.
    pub fn commit_table(&mut self, table: &str, data: &Table, primary_keys: &[&str]) -> Result<String> {
        let keys: Vec<String> = primary_keys.iter().map(|k| k.to_string()).collect();
        let mode = if self.tables()?.iter().any(|t| t == table) {
            ImportMode::Update
        } else {
            ImportMode::Create
        };
        self.import_table(table, data, mode, &keys)?;
        self.add(&[table.to_string()])?;
        self.commit(&format!("Update {table}"), false)?;
        self.head()
    }

    /// Replace a table's working contents outright, bypassing import semantics.
    pub fn replace_table(&mut self, table: &str, data: &Table, primary_keys: &[&str]) -> Result<()> {
        let stored = StoredTable {
            data: data.clone(),
            primary_key: primary_keys.iter().map(|k| k.to_string()).collect(),
        };
        self.with_repo(|repo| {
            repo.branch_mut()?.working.insert(table.to_string(), stored);
            Ok(())
        })
    }
}

impl VersionedDb for MemoryHandle {
    fn repo_dir(&self) -> &Path {
        &self.path
    }

    fn active_branch(&self) -> Result<String> {
        self.with_repo(|repo| Ok(repo.active.clone()))
    }

    fn branches(&self) -> Result<Vec<BranchInfo>> {
        self.with_repo(|repo| {
            Ok(repo
                .branches
                .iter()
                .map(|(name, state)| BranchInfo {
                    name: name.clone(),
                    hash: state.head.clone(),
                })
                .collect())
        })
    }

    fn checkout(&mut self, branch: &str) -> Result<()> {
        self.with_repo(|repo| {
            if !repo.branches.contains_key(branch) {
                return Err(DoltError::BranchNotFound(branch.to_string()));
            }
            repo.active = branch.to_string();
            Ok(())
        })
    }

    fn create_branch(&mut self, name: &str, start_point: &str) -> Result<()> {
        self.with_repo(|repo| {
            if repo.branches.contains_key(name) {
                return Err(DoltError::BranchExists(name.to_string()));
            }
            let head = repo.resolve(start_point)?;
            let snapshot = repo.snapshot(&head)?.clone();
            repo.branches.insert(
                name.to_string(),
                BranchState {
                    head,
                    working: snapshot.clone(),
                    staged: snapshot,
                },
            );
            repo.active = name.to_string();
            Ok(())
        })
    }

    fn delete_branch(&mut self, name: &str) -> Result<()> {
        self.with_repo(|repo| {
            if repo.active == name {
                return Err(DoltError::Sql(format!(
                    "cannot delete checked out branch {name}"
                )));
            }
            repo.branches
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| DoltError::BranchNotFound(name.to_string()))
        })
    }

    fn status(&self) -> Result<WorkingStatus> {
        self.with_repo(|repo| repo.status())
    }

    fn head(&self) -> Result<String> {
        self.with_repo(|repo| Ok(repo.branch()?.head.clone()))
    }

    fn sql(&self, query: &str) -> Result<Table> {
        self.with_repo(|repo| repo.query(query))
    }

    fn tables(&self) -> Result<Vec<String>> {
        self.with_repo(|repo| Ok(repo.branch()?.working.keys().cloned().collect()))
    }

    fn import_table(
        &mut self,
        table: &str,
        data: &Table,
        mode: ImportMode,
        primary_keys: &[String],
    ) -> Result<()> {
        self.with_repo(|repo| repo.import(table, data, mode, primary_keys))
    }

    fn export_csv(&self, table: &str, path: &Path) -> Result<()> {
        let csv = self.with_repo(|repo| {
            repo.branch()?
                .working
                .get(table)
                .map(|t| t.data.to_csv())
                .ok_or_else(|| DoltError::TableNotFound(table.to_string()))
        })?;
        std::fs::write(path, csv)?;
        Ok(())
    }

    fn add(&mut self, tables: &[String]) -> Result<()> {
        self.with_repo(|repo| {
            let branch = repo.branch_mut()?;
            for table in tables {
                if let Some(stored) = branch.working.get(table).cloned() {
                    branch.staged.insert(table.clone(), stored);
                } else if branch.staged.remove(table).is_none() {
                    return Err(DoltError::TableNotFound(table.clone()));
                }
            }
            Ok(())
        })
    }

    fn commit(&mut self, message: &str, allow_empty: bool) -> Result<()> {
        self.with_repo(|repo| {
            let (parent, staged) = {
                let branch = repo.branch()?;
                (branch.head.clone(), branch.staged.clone())
            };
            if !allow_empty && repo.snapshot(&parent)? == &staged {
                return Err(DoltError::NothingToCommit);
            }
            let hash = repo.record_commit(Some(parent), message, staged);
            repo.branch_mut()?.head = hash;
            Ok(())
        })
    }

    fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let mut commits = repo.ancestry(&repo.branch()?.head);
            if let Some(n) = limit {
                commits.truncate(n);
            }
            Ok(commits)
        })
    }

    fn find_commit(&self, hash: &str) -> Result<Option<CommitInfo>> {
        self.with_repo(|repo| Ok(repo.commits.get(hash).map(|c| c.info.clone())))
    }

    fn changed_tables(&self, commit: &str) -> Result<Vec<String>> {
        self.with_repo(|repo| {
            let entry = repo
                .commits
                .get(commit)
                .ok_or_else(|| DoltError::CommitNotFound(commit.to_string()))?;
            let empty = Snapshot::new();
            let parent = match &entry.parent {
                Some(p) => repo.snapshot(p)?,
                None => &empty,
            };
            let mut changed: Vec<String> = entry
                .snapshot
                .keys()
                .chain(parent.keys())
                .filter(|name| entry.snapshot.get(*name) != parent.get(*name))
                .cloned()
                .collect();
            changed.sort();
            changed.dedup();
            Ok(changed)
        })
    }

    fn push(&mut self, remote: &str, branch: &str) -> Result<()> {
        self.with_repo(|repo| {
            if !repo.branches.contains_key(branch) {
                return Err(DoltError::BranchNotFound(branch.to_string()));
            }
            repo.pushes.push((remote.to_string(), branch.to_string()));
            Ok(())
        })
    }
}
