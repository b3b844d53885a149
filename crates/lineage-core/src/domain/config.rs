//! Connection configs: which database, branch and commit a scope targets.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Branch used when a config does not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// Database location used when a config does not name one.
pub const DEFAULT_DATABASE: &str = ".";

/// Identifies a target database location, branch and pinned commit.
///
/// The `id` correlates recorded actions back to the config they went
/// through. Once `commit` is resolved it stays fixed for the life of the
/// scope that resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoltConfig {
    #[serde(default = "new_config_id")]
    pub id: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub dolthub_remote: bool,
    #[serde(default)]
    pub push_on_commit: bool,
}

impl Default for DoltConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE)
    }
}

impl DoltConfig {
    /// New config on the default branch with a fresh id and no pinned commit.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            id: new_config_id(),
            database: database.into(),
            branch: default_branch(),
            commit: None,
            dolthub_remote: false,
            push_on_commit: false,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_push_on_commit(mut self, push: bool) -> Self {
        self.push_on_commit = push;
        self
    }

    pub fn with_dolthub_remote(mut self, remote: bool) -> Self {
        self.dolthub_remote = remote;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database)
    }

    pub fn is_pinned(&self) -> bool {
        self.commit.is_some()
    }
}

fn new_config_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}
