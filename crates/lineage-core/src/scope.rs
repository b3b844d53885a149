//! Branch and audit scopes: the read/write façade a unit of work uses.
//!
//! A scope is `Open` from construction until [`Scope::close`] (or the end of
//! [`Scope::run`]), passes through `Closing` while it commits and merges,
//! and ends `Closed`.
//!
//! - **Branch mode** reads at the config's pinned commit, writes to the
//!   live branch, and commits every write in one commit on close.
//! - **Audit mode** replays a prior ledger: each read re-resolves a
//!   recorded action at its recorded commit. Writes, free-form SQL and
//!   diffs are rejected.
//!
//! New actions land in the unit of work's ledger only when the scope
//! closes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use dolt_state::{DbConnector, ImportMode, Table};

use crate::context::UnitOfWork;
use crate::correlator::ObjectCorrelator;
use crate::domain::{Action, AuditLedger, DoltConfig, LineageError, Result};
use crate::handle_cache::HandleCache;
use crate::metrics::METRICS;
use crate::obs;
use crate::policy;
use crate::provenance;
use crate::read_exec;
use crate::settings::LineageSettings;

/// Scope lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Open,
    Closing,
    Closed,
}

/// Which façade a scope presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Branch,
    Audit,
}

impl ScopeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeMode::Branch => "branch",
            ScopeMode::Audit => "audit",
        }
    }
}

enum Mode {
    Branch { config: DoltConfig },
    Audit { source: AuditLedger },
}

impl Mode {
    fn kind(&self) -> ScopeMode {
        match self {
            Mode::Branch { .. } => ScopeMode::Branch,
            Mode::Audit { .. } => ScopeMode::Audit,
        }
    }

    fn branch_config_mut(&mut self) -> Option<&mut DoltConfig> {
        match self {
            Mode::Branch { config } => Some(config),
            Mode::Audit { .. } => None,
        }
    }

    /// Write-gate: the operation is only available in branch mode.
    fn require_branch(&self, operation: &'static str) -> Result<()> {
        match self {
            Mode::Branch { .. } => Ok(()),
            Mode::Audit { .. } => Err(LineageError::AuditModeUnsupported { operation }),
        }
    }
}

/// What [`open_scope`] should open.
#[derive(Debug, Clone, Default)]
pub struct ScopeRequest {
    pub audit: Option<AuditLedger>,
    pub config: Option<DoltConfig>,
}

impl ScopeRequest {
    pub fn audit(ledger: AuditLedger) -> Self {
        Self {
            audit: Some(ledger),
            config: None,
        }
    }

    pub fn config(config: DoltConfig) -> Self {
        Self {
            audit: None,
            config: Some(config),
        }
    }
}

/// Open a branch or audit scope.
///
/// An audit ledger wins over a config when both are given. With neither,
/// a non-empty ledger already carried by `unit` is replayed.
pub fn open_scope<'u, U: UnitOfWork + ?Sized>(
    unit: &'u mut U,
    request: ScopeRequest,
    connector: Arc<dyn DbConnector>,
    settings: LineageSettings,
) -> Result<Scope<'u, U>> {
    match (request.audit, request.config) {
        (Some(audit), Some(_)) => {
            warn!("both audit and config given; using audit mode");
            Scope::audit(unit, audit, connector, settings)
        }
        (Some(audit), None) => Scope::audit(unit, audit, connector, settings),
        (None, Some(config)) => Scope::branch(unit, config, connector, settings),
        (None, None) => {
            let prior = unit.ledger().filter(|l| !l.is_empty()).cloned();
            match prior {
                Some(ledger) => Scope::audit(unit, ledger, connector, settings),
                None => Err(LineageError::MissingScopeTarget),
            }
        }
    }
}

/// A branch- or audit-mode accessor bound to one unit of work.
pub struct Scope<'u, U: UnitOfWork + ?Sized> {
    unit: &'u mut U,
    mode: Mode,
    handles: HandleCache,
    settings: LineageSettings,
    state: ScopeState,
    new_actions: BTreeMap<String, Action>,
    pending_writes: Vec<String>,
    correlator: ObjectCorrelator,
}

impl<'u, U: UnitOfWork + ?Sized> Scope<'u, U> {
    /// Branch-mode scope. The handle is acquired immediately, so database,
    /// branch and clean-tree failures surface here and `config.commit` is
    /// pinned before the first read.
    pub fn branch(
        unit: &'u mut U,
        config: DoltConfig,
        connector: Arc<dyn DbConnector>,
        settings: LineageSettings,
    ) -> Result<Self> {
        let mut scope = Self::new(unit, Mode::Branch { config }, connector, settings);
        if let Some(config) = scope.mode.branch_config_mut() {
            scope.handles.acquire(config)?;
            obs::emit_scope_opened(&scope.unit.pathspec(), "branch", &config.database);
        }
        Ok(scope)
    }

    /// Audit-mode scope replaying `ledger`. Handles are acquired per config
    /// on first read.
    pub fn audit(
        unit: &'u mut U,
        ledger: AuditLedger,
        connector: Arc<dyn DbConnector>,
        settings: LineageSettings,
    ) -> Result<Self> {
        let databases: Vec<&str> = ledger.configs.values().map(|c| c.database.as_str()).collect();
        obs::emit_scope_opened(&unit.pathspec(), "audit", &databases.join(","));
        Ok(Self::new(unit, Mode::Audit { source: ledger }, connector, settings))
    }

    fn new(
        unit: &'u mut U,
        mode: Mode,
        connector: Arc<dyn DbConnector>,
        settings: LineageSettings,
    ) -> Self {
        let mut correlator = ObjectCorrelator::new();
        correlator.begin(&*unit);
        Self {
            unit,
            mode,
            handles: HandleCache::new(connector),
            settings,
            state: ScopeState::Open,
            new_actions: BTreeMap::new(),
            pending_writes: Vec::new(),
            correlator,
        }
    }

    /// Run `f` inside the scope, then close it.
    ///
    /// The scope closes even when `f` fails; `f`'s error is returned and a
    /// close error in that case is only logged.
    pub fn run<T, F>(mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let pathspec = self.unit.pathspec();
        let _span = obs::ScopeSpan::enter(&pathspec, self.mode.kind().as_str());
        self.settings
            .strictness
            .check(self.unit.is_running(), "scope")?;
        self.correlator.begin(&*self.unit);

        let outcome = f(&mut self);
        let closed = self.close();
        match outcome {
            Ok(value) => closed.map(|()| value),
            Err(e) => {
                if let Err(close_err) = closed {
                    obs::emit_scope_close_error(&pathspec, &close_err);
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Data access
    // -----------------------------------------------------------------------

    /// Branch mode: read table `name` at the pinned commit.
    /// Audit mode: replay the recorded action keyed `name`.
    ///
    /// The action is recorded under `as_key`, defaulting to `name`.
    pub fn read(&mut self, name: &str, as_key: Option<&str>) -> Result<Table> {
        self.ensure_open()?;
        let key = as_key.unwrap_or(name);
        let mut action = match &self.mode {
            Mode::Branch { config } => {
                Action::read_table(key, config, &self.unit.pathspec(), name)
            }
            Mode::Audit { source } => source
                .action(name)
                .ok_or_else(|| LineageError::KeyNotFound(name.to_string()))?
                .replayed_as(key),
        };
        self.ensure_unique(&action.key)?;

        let table = self.execute(&mut action)?;
        match self.mode.kind() {
            ScopeMode::Branch => METRICS.inc_reads(),
            ScopeMode::Audit => METRICS.inc_replays(),
        }
        self.record(action, &table);
        Ok(table)
    }

    /// Run caller-supplied SQL at the pinned commit, recorded under `as_key`.
    pub fn sql(&mut self, query: &str, as_key: &str) -> Result<Table> {
        self.ensure_open()?;
        let mut action = match &self.mode {
            Mode::Branch { config } => {
                Action::read_query(as_key, config, &self.unit.pathspec(), query)
            }
            Mode::Audit { .. } => return Err(LineageError::AuditModeUnsupported { operation: "sql" }),
        };
        self.ensure_unique(&action.key)?;

        let table = self.execute(&mut action)?;
        METRICS.inc_reads();
        self.record(action, &table);
        Ok(table)
    }

    /// Import `data` into `table_name` on the live branch and stage it for
    /// the scope commit.
    ///
    /// Without primary keys the row index becomes an `index` column and all
    /// columns form the key. Rows with a null key cell are dropped.
    pub fn write(
        &mut self,
        data: &Table,
        table_name: &str,
        primary_keys: Option<&[&str]>,
        as_key: Option<&str>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.mode.require_branch("write")?;
        if !self
            .settings
            .strictness
            .check(self.unit.is_running(), "write")?
        {
            return Ok(());
        }
        let key = as_key.unwrap_or(table_name);
        self.ensure_unique(key)?;

        let (staged, keys) = match primary_keys {
            Some(pks) if !pks.is_empty() => {
                let keys: Vec<String> = pks.iter().map(|k| k.to_string()).collect();
                (data.drop_null_keys(&keys)?, keys)
            }
            _ => {
                let indexed = data.with_row_index();
                let keys = indexed.columns().to_vec();
                (indexed.drop_null_keys(&keys)?, keys)
            }
        };

        let pathspec = self.unit.pathspec();
        let config = self
            .mode
            .branch_config_mut()
            .ok_or(LineageError::AuditModeUnsupported { operation: "write" })?;
        let action = Action::write_table(key, config, &pathspec, table_name);
        let db = self.handles.acquire(config)?;
        let mode = if db.tables()?.iter().any(|t| t == table_name) {
            ImportMode::Update
        } else {
            ImportMode::Create
        };
        db.import_table(table_name, &staged, mode, &keys)?;
        debug!(table = %table_name, rows = staged.len(), ?mode, "staged write");

        METRICS.inc_writes();
        self.record(action, data);
        Ok(())
    }

    /// Row-level diffs between two commits, one result table per name.
    pub fn diff(
        &mut self,
        from_commit: &str,
        to_commit: &str,
        tables: &[&str],
    ) -> Result<BTreeMap<String, Table>> {
        self.ensure_open()?;
        let config = self
            .mode
            .branch_config_mut()
            .ok_or(LineageError::AuditModeUnsupported { operation: "diff" })?;
        let db = self.handles.acquire(config)?;

        let mut out = BTreeMap::new();
        for table in tables {
            let query = read_exec::commit_diff_query(table, from_commit, to_commit);
            out.insert(table.to_string(), db.sql(&query)?);
        }
        Ok(out)
    }

    /// Pathspec of the unit of work that wrote `table` at `commit`, or at
    /// the head of `branch` (default: the config's branch).
    pub fn trace_unit(
        &mut self,
        table: &str,
        branch: Option<&str>,
        commit: Option<&str>,
    ) -> Result<String> {
        self.ensure_open()?;
        let config = self
            .mode
            .branch_config_mut()
            .ok_or(LineageError::AuditModeUnsupported { operation: "trace" })?;
        let branch = branch.unwrap_or(config.branch.as_str()).to_string();
        let db = self.handles.acquire(config)?;
        provenance::trace_unit(&*db, table, &branch, commit)
    }

    // -----------------------------------------------------------------------
    // Exit
    // -----------------------------------------------------------------------

    /// Commit pending writes (branch mode) and merge new actions into the
    /// unit of work's ledger. Closing twice is a no-op.
    ///
    /// A failed commit leaves the ledger untouched and the working tree
    /// possibly staged; nothing is rolled back.
    pub fn close(&mut self) -> Result<()> {
        if self.state != ScopeState::Open {
            return Ok(());
        }
        self.state = ScopeState::Closing;
        let outcome = self.finish();
        self.state = ScopeState::Closed;
        outcome
    }

    fn finish(&mut self) -> Result<()> {
        let pathspec = self.unit.pathspec();
        let recorded = self.new_actions.len();
        if recorded > 0 {
            self.correlator.annotate(&*self.unit, &mut self.new_actions);
            self.commit_pending(&pathspec)?;
            self.merge_into_ledger();
        }
        obs::emit_scope_closed(&pathspec, self.mode.kind().as_str(), recorded);
        Ok(())
    }

    /// One commit for every table written in this scope.
    fn commit_pending(&mut self, pathspec: &str) -> Result<()> {
        if self.pending_writes.is_empty() {
            return Ok(());
        }
        if !self
            .settings
            .strictness
            .check(self.unit.is_running(), "commit")?
        {
            return Ok(());
        }
        let Some(config) = self.mode.branch_config_mut() else {
            return Ok(());
        };

        let mut tables: Vec<String> = Vec::new();
        for key in &self.pending_writes {
            let table = self.new_actions.get(key).and_then(|a| a.table_name.clone());
            if let Some(table) = table {
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }

        let db = self.handles.acquire(config)?;
        db.add(&tables)?;
        db.commit(&provenance::commit_message(pathspec), true)?;
        let commit = db.head()?;
        METRICS.inc_commits();
        obs::emit_scope_committed(pathspec, &commit, tables.len());

        for key in &self.pending_writes {
            if let Some(action) = self.new_actions.get_mut(key) {
                action.resolve_commit(&commit);
            }
        }
        self.pending_writes.clear();

        if config.push_on_commit {
            db.push(&self.settings.remote, &config.branch)?;
            debug!(remote = %self.settings.remote, branch = %config.branch, "pushed scope commit");
        }
        Ok(())
    }

    fn merge_into_ledger(&mut self) {
        let actions = std::mem::take(&mut self.new_actions);
        let configs: Vec<DoltConfig> = match &self.mode {
            Mode::Branch { config } => vec![config.clone()],
            Mode::Audit { source } => actions
                .values()
                .filter_map(|a| source.config(&a.config_id).cloned())
                .collect(),
        };
        self.unit
            .ledger_mut()
            .merge_scope(actions.into_values(), configs);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ScopeState::Open => Ok(()),
            ScopeState::Closing | ScopeState::Closed => Err(LineageError::ScopeClosed),
        }
    }

    fn ensure_unique(&self, key: &str) -> Result<()> {
        if self.new_actions.contains_key(key) {
            return Err(LineageError::DuplicateKey(key.to_string()));
        }
        Ok(())
    }

    fn execute(&mut self, action: &mut Action) -> Result<Table> {
        let config = match &mut self.mode {
            Mode::Branch { config } => config,
            Mode::Audit { source } => source
                .configs
                .get_mut(&action.config_id)
                .ok_or_else(|| LineageError::UnknownConfig(action.config_id.clone()))?,
        };
        read_exec::execute(&mut self.handles, config, action)
    }

    /// Record `action` and mark `object` as its output. Skipped, with a
    /// warning, outside a running unit of work.
    fn record(&mut self, action: Action, object: &Table) {
        if !policy::recording_allowed(self.unit.is_running(), "record") {
            return;
        }
        obs::emit_action_recorded(&action.key, &action.kind.to_string(), action.commit.as_deref());
        self.correlator.mark(object, &action.key);
        if action.is_write() {
            self.pending_writes.push(action.key.clone());
        }
        self.new_actions.insert(action.key.clone(), action);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn unit(&self) -> &U {
        &*self.unit
    }

    pub fn unit_mut(&mut self) -> &mut U {
        &mut *self.unit
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode.kind()
    }

    /// The branch-mode config, with its pinned commit.
    pub fn config(&self) -> Option<&DoltConfig> {
        match &self.mode {
            Mode::Branch { config } => Some(config),
            Mode::Audit { .. } => None,
        }
    }

    /// Actions recorded so far and not yet merged.
    pub fn actions(&self) -> &BTreeMap<String, Action> {
        &self.new_actions
    }
}

impl<U: UnitOfWork + ?Sized> Drop for Scope<'_, U> {
    fn drop(&mut self) {
        if self.state == ScopeState::Open && !self.new_actions.is_empty() {
            warn!(
                pathspec = %self.unit.pathspec(),
                pending = self.new_actions.len(),
                "scope dropped without close; actions not merged and writes not committed"
            );
        }
    }
}
