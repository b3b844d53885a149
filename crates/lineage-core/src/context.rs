//! Unit-of-work carriers.
//!
//! A scope never reaches for ambient "current run" state. Whatever runs the
//! pipeline step hands the scope an explicit [`UnitOfWork`], which supplies
//! the pathspec, the running flag, and the ledger attribute the scope
//! merges into.

use std::collections::BTreeMap;

use dolt_state::Table;

use crate::domain::{value_digest, AuditLedger};

/// The external pipeline step a scope records against.
pub trait UnitOfWork {
    /// Identifier embedded in actions and commit messages.
    fn pathspec(&self) -> String;

    /// Whether the step is executing, as opposed to being inspected later.
    fn is_running(&self) -> bool;

    /// The carried ledger, if one exists yet.
    fn ledger(&self) -> Option<&AuditLedger>;

    /// The carried ledger, created empty on first use.
    fn ledger_mut(&mut self) -> &mut AuditLedger;

    /// Names of every attribute currently bound on the step.
    fn attribute_names(&self) -> Vec<String>;

    /// Content digest of a bound attribute, if it can be computed.
    fn attribute_digest(&self, name: &str) -> Option<String>;
}

/// A value bound on a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Table(Table),
    Value(serde_json::Value),
}

impl Artifact {
    /// Row-content digest for tables, canonical JSON digest otherwise.
    pub fn digest(&self) -> Option<String> {
        match self {
            Artifact::Table(table) => Some(table.content_digest()),
            Artifact::Value(value) => value_digest(value).ok(),
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Artifact::Table(table) => Some(table),
            Artifact::Value(_) => None,
        }
    }
}

impl From<Table> for Artifact {
    fn from(table: Table) -> Self {
        Artifact::Table(table)
    }
}

impl From<serde_json::Value> for Artifact {
    fn from(value: serde_json::Value) -> Self {
        Artifact::Value(value)
    }
}

/// In-process step: `flow/run/step/task` plus named artifacts.
#[derive(Debug, Clone)]
pub struct StepContext {
    flow: String,
    run_id: String,
    step: String,
    task_id: String,
    running: bool,
    artifacts: BTreeMap<String, Artifact>,
    ledger: Option<AuditLedger>,
}

impl StepContext {
    /// A running step with no artifacts and no ledger yet.
    pub fn new(
        flow: impl Into<String>,
        run_id: impl Into<String>,
        step: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            flow: flow.into(),
            run_id: run_id.into(),
            step: step.into(),
            task_id: task_id.into(),
            running: true,
            artifacts: BTreeMap::new(),
            ledger: None,
        }
    }

    /// A finished step, for inspecting or replaying outside a run.
    pub fn inactive(
        flow: impl Into<String>,
        run_id: impl Into<String>,
        step: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self::new(flow, run_id, step, task_id).with_running(false)
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    /// Seed the carried ledger, as when a step inherits a prior step's output.
    pub fn with_ledger(mut self, ledger: AuditLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Bind an artifact under `name`, replacing any previous binding.
    pub fn bind(&mut self, name: impl Into<String>, artifact: impl Into<Artifact>) {
        self.artifacts.insert(name.into(), artifact.into());
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.artifact(name).and_then(Artifact::as_table)
    }

    /// Take the carried ledger, leaving none behind.
    pub fn take_ledger(&mut self) -> Option<AuditLedger> {
        self.ledger.take()
    }
}

impl UnitOfWork for StepContext {
    fn pathspec(&self) -> String {
        format!("{}/{}/{}/{}", self.flow, self.run_id, self.step, self.task_id)
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn ledger(&self) -> Option<&AuditLedger> {
        self.ledger.as_ref()
    }

    fn ledger_mut(&mut self) -> &mut AuditLedger {
        self.ledger.get_or_insert_with(AuditLedger::new)
    }

    fn attribute_names(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    fn attribute_digest(&self, name: &str) -> Option<String> {
        self.artifacts.get(name).and_then(Artifact::digest)
    }
}
