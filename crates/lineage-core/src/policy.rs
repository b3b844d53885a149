//! Runtime checks for operations that only make sense inside a running
//! unit of work.
//!
//! Mutating operations (`write`, the scope commit, entering a scope) call
//! [`Strictness::check`] before doing anything. Action recording uses
//! [`recording_allowed`], which never fails.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{LineageError, Result};
use crate::obs;

/// What to do when a runtime-only operation runs outside a unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Fail with [`LineageError::RuntimeOnly`]
    #[default]
    Fail,
    /// Log a warning and skip the operation
    Warn,
}

impl Strictness {
    /// `Ok(true)` to proceed, `Ok(false)` to skip, or `RuntimeOnly`.
    pub fn check(self, running: bool, operation: &'static str) -> Result<bool> {
        if running {
            return Ok(true);
        }
        obs::emit_runtime_denied(operation, self);
        match self {
            Strictness::Fail => Err(LineageError::RuntimeOnly { operation }),
            Strictness::Warn => Ok(false),
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strictness::Fail => write!(f, "fail"),
            Strictness::Warn => write!(f, "warn"),
        }
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "strict" | "error" => Ok(Strictness::Fail),
            "warn" | "permissive" => Ok(Strictness::Warn),
            other => Err(format!("unknown strictness '{other}' (expected fail or warn)")),
        }
    }
}

/// Whether an action may be recorded. Outside a running unit the action is
/// dropped with a warning; the data access itself still happens.
pub fn recording_allowed(running: bool, operation: &'static str) -> bool {
    if !running {
        obs::emit_runtime_denied(operation, Strictness::Warn);
    }
    running
}
