//! Structured observability hooks for scope lifecycle events.
//!
//! This module provides:
//! - Scope-wide tracing spans via the `ScopeSpan` RAII guard
//! - Emitters for open, record, commit and close events, and for runtime
//!   checks that denied an operation
//!
//! Events go out at `info!` (denials and close errors at `warn!`). Filter
//! with `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::policy::Strictness;

/// RAII guard that enters a span tagged with the unit of work and scope mode.
///
/// ```ignore
/// let _span = ScopeSpan::enter("Flow/1/start/1", "branch");
/// // events inside carry pathspec and mode
/// ```
pub struct ScopeSpan {
    _span: tracing::span::EnteredSpan,
}

impl ScopeSpan {
    pub fn enter(pathspec: &str, mode: &str) -> Self {
        let span = tracing::info_span!("lineage.scope", pathspec = %pathspec, mode = %mode);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_scope_opened(pathspec: &str, mode: &str, database: &str) {
    info!(event = "scope.opened", pathspec = %pathspec, mode = %mode, database = %database);
}

pub fn emit_action_recorded(key: &str, kind: &str, commit: Option<&str>) {
    info!(
        event = "action.recorded",
        key = %key,
        kind = %kind,
        commit = commit.unwrap_or("-"),
    );
}

/// One commit covering every table written in the scope.
pub fn emit_scope_committed(pathspec: &str, commit: &str, tables: usize) {
    info!(event = "scope.committed", pathspec = %pathspec, commit = %commit, tables = tables);
}

pub fn emit_scope_closed(pathspec: &str, mode: &str, actions: usize) {
    info!(event = "scope.closed", pathspec = %pathspec, mode = %mode, actions = actions);
}

pub fn emit_scope_close_error(pathspec: &str, error: &dyn std::fmt::Display) {
    warn!(event = "scope.close_error", pathspec = %pathspec, error = %error);
}

pub fn emit_runtime_denied(operation: &str, strictness: Strictness) {
    warn!(
        event = "runtime.denied",
        operation = %operation,
        strictness = %strictness,
        "operation only permitted while a unit of work is running",
    );
}
