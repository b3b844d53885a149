//! Lineage-Core: branch-scoped, auditable access to versioned tables
//!
//! A pipeline step opens a [`Scope`] against a versioned database. Every
//! read and write through the scope is recorded as an [`Action`]; on close,
//! pending writes land in a single commit and the actions merge into the
//! [`AuditLedger`] the step carries forward. A later step can replay that
//! ledger in audit mode and re-read exactly the data versions consumed.
//!
//! ## Key Components
//!
//! - `domain`: `Action`, `DoltConfig`, `AuditLedger` and the error taxonomy
//! - `scope`: branch and audit façades plus the `open_scope` factory
//! - `handle_cache`: one live database handle per config, with precondition checks
//! - `checkout`: branch switch strategies used to sandbox reads
//! - `correlator`: best-effort artifact naming for recorded actions
//! - `context`: the `UnitOfWork` carrier trait and `StepContext`

pub mod checkout;
pub mod context;
pub mod correlator;
pub mod domain;
pub mod handle_cache;
pub mod metrics;
pub mod obs;
pub mod policy;
pub mod provenance;
pub mod read_exec;
pub mod scope;
pub mod settings;
pub mod telemetry;

pub use checkout::{temporary_branch_name, BranchSwitch, DETACHED_PREFIX};
pub use context::{Artifact, StepContext, UnitOfWork};
pub use correlator::ObjectCorrelator;
pub use domain::{
    canonical_json, now_micros, value_digest, Action, ActionKind, AuditLedger, DoltConfig,
    LineageError, Result, DEFAULT_BRANCH, DEFAULT_DATABASE,
};
pub use handle_cache::HandleCache;
pub use metrics::{Metrics, METRICS};
pub use policy::{recording_allowed, Strictness};
pub use provenance::{commit_message, parse_run_message, trace_unit};
pub use read_exec::commit_diff_query;
pub use scope::{open_scope, Scope, ScopeMode, ScopeRequest, ScopeState};
pub use settings::{LineageSettings, DEFAULT_REMOTE};
pub use telemetry::init_tracing;
