//! Process-level settings read from the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use dolt_state::DEFAULT_DOLT_BIN;

use crate::domain::{DoltConfig, DEFAULT_BRANCH};
use crate::policy::Strictness;

pub const ENV_STRICTNESS: &str = "DOLT_LINEAGE_STRICTNESS";
pub const ENV_BRANCH: &str = "DOLT_LINEAGE_BRANCH";
pub const ENV_DOLT_BIN: &str = "DOLT_BIN";
pub const ENV_REMOTE: &str = "DOLT_LINEAGE_REMOTE";

/// Remote used by push-on-commit when none is configured.
pub const DEFAULT_REMOTE: &str = "origin";

/// Settings shared by every scope a process opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageSettings {
    /// Behavior of runtime-only operations outside a running unit
    pub strictness: Strictness,
    /// Branch given to configs built through [`LineageSettings::config`]
    pub default_branch: String,
    /// `dolt` executable
    pub dolt_bin: PathBuf,
    /// Remote that push-on-commit targets
    pub remote: String,
}

impl Default for LineageSettings {
    fn default() -> Self {
        Self {
            strictness: Strictness::Fail,
            default_branch: DEFAULT_BRANCH.to_string(),
            dolt_bin: PathBuf::from(DEFAULT_DOLT_BIN),
            remote: DEFAULT_REMOTE.to_string(),
        }
    }
}

impl LineageSettings {
    /// Read settings from the environment, falling back to defaults.
    ///
    /// An unparseable strictness value logs a warning and keeps `fail`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let strictness = match std::env::var(ENV_STRICTNESS) {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(variable = ENV_STRICTNESS, error = %e, "ignoring invalid setting");
                defaults.strictness
            }),
            Err(_) => defaults.strictness,
        };
        Self {
            strictness,
            default_branch: std::env::var(ENV_BRANCH).unwrap_or(defaults.default_branch),
            dolt_bin: std::env::var_os(ENV_DOLT_BIN)
                .map(PathBuf::from)
                .unwrap_or(defaults.dolt_bin),
            remote: std::env::var(ENV_REMOTE).unwrap_or(defaults.remote),
        }
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_dolt_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.dolt_bin = bin.into();
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// New config for `database` on the default branch.
    pub fn config(&self, database: impl Into<String>) -> DoltConfig {
        DoltConfig::new(database).with_branch(self.default_branch.clone())
    }
}
