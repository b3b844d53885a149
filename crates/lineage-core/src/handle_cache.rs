//! One live database handle per config id, acquired lazily.
//!
//! Acquisition enforces the preconditions a scope relies on: the target is
//! an initialized database, the configured branch exists and is checked
//! out, and the working tree is clean. A config without a commit is pinned
//! to the head seen at acquisition.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use dolt_state::{DbConnector, InitOutcome, VersionedDb};

use crate::domain::{DoltConfig, LineageError, Result};

/// Per-scope handle cache.
pub struct HandleCache {
    connector: Arc<dyn DbConnector>,
    handles: HashMap<String, Box<dyn VersionedDb>>,
}

impl HandleCache {
    pub fn new(connector: Arc<dyn DbConnector>) -> Self {
        Self {
            connector,
            handles: HashMap::new(),
        }
    }

    /// Cached handle for `config.id`, connecting on first use.
    pub fn acquire(&mut self, config: &mut DoltConfig) -> Result<&mut dyn VersionedDb> {
        let handle = match self.handles.entry(config.id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(connect(self.connector.as_ref(), config)?),
        };
        Ok(handle.as_mut())
    }

    pub fn is_cached(&self, config_id: &str) -> bool {
        self.handles.contains_key(config_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn connect(connector: &dyn DbConnector, config: &mut DoltConfig) -> Result<Box<dyn VersionedDb>> {
    let path = config.database_path();
    match connector.init(&path) {
        Ok(InitOutcome::Created) => info!(database = %config.database, "initialized database"),
        Ok(InitOutcome::AlreadyInitialized) => {}
        Err(e) => warn!(database = %config.database, error = %e, "init failed; checking for an existing database"),
    }

    if !connector.is_database(&path) {
        return Err(LineageError::NotADatabase {
            path: config.database.clone(),
        });
    }

    let mut db = connector.open(&path)?;
    let current = db.active_branch()?;
    info!(
        database = %config.database,
        current_branch = %current,
        branch = %config.branch,
        "acquired database handle"
    );

    if config.branch != current {
        let exists = db.branches()?.iter().any(|b| b.name == config.branch);
        if !exists {
            return Err(LineageError::BranchNotFound {
                branch: config.branch.clone(),
            });
        }
        db.checkout(&config.branch)?;
    }

    let status = db.status()?;
    if !status.is_clean() {
        return Err(LineageError::DirtyWorkingTree {
            path: config.database.clone(),
            tables: status.changed_tables,
        });
    }

    if config.commit.is_none() {
        let head = db.head()?;
        debug!(config_id = %config.id, commit = %head, "pinned config to head");
        config.commit = Some(head);
    }

    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolt_state::fakes::MemoryDolt;
    use dolt_state::Table;
    use serde_json::json;

    fn seeded(path: &str) -> (Arc<MemoryDolt>, String) {
        let dolt = Arc::new(MemoryDolt::new());
        let mut db = dolt.create(path).unwrap();
        let table = Table::from_rows(["index", "A"], vec![vec![json!(0), json!(1)]]).unwrap();
        let head = db.commit_table("bar", &table, &["index"]).unwrap();
        (dolt, head)
    }

    #[test]
    fn acquisition_pins_head_and_is_cached() {
        let (dolt, head) = seeded("/cache/pin");
        let mut cache = HandleCache::new(dolt.clone());
        let mut config = DoltConfig::new("/cache/pin");

        cache.acquire(&mut config).unwrap();
        assert_eq!(config.commit.as_deref(), Some(head.as_str()));
        cache.acquire(&mut config).unwrap();

        assert_eq!(dolt.open_calls(), 1);
        assert_eq!(dolt.init_calls(), 1);
        assert!(cache.is_cached(&config.id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn explicit_commit_is_kept() {
        let (dolt, _) = seeded("/cache/explicit");
        let mut cache = HandleCache::new(dolt);
        let mut config = DoltConfig::new("/cache/explicit").with_commit("older");
        cache.acquire(&mut config).unwrap();
        assert_eq!(config.commit.as_deref(), Some("older"));
    }

    #[test]
    fn missing_branch_is_rejected() {
        let (dolt, _) = seeded("/cache/branch");
        let mut cache = HandleCache::new(dolt);
        let mut config = DoltConfig::new("/cache/branch").with_branch("nope");
        let err = cache.acquire(&mut config).err().unwrap();
        assert!(matches!(err, LineageError::BranchNotFound { ref branch } if branch == "nope"));
        assert!(cache.is_empty());
    }

    #[test]
    fn uninitializable_directory_is_not_a_database() {
        let dolt = Arc::new(MemoryDolt::new());
        dolt.refuse_init("/cache/readonly");
        let mut cache = HandleCache::new(dolt.clone());
        let mut config = DoltConfig::new("/cache/readonly");
        let err = cache.acquire(&mut config).err().unwrap();
        assert!(matches!(err, LineageError::NotADatabase { .. }));
        assert_eq!(dolt.open_calls(), 0);
    }

    #[test]
    fn checks_out_configured_branch() {
        let (dolt, head) = seeded("/cache/feature");
        let mut seed = dolt.handle("/cache/feature").unwrap();
        seed.create_branch("feature", &head).unwrap();
        seed.checkout("main").unwrap();

        let mut cache = HandleCache::new(dolt);
        let mut config = DoltConfig::new("/cache/feature").with_branch("feature");
        let db = cache.acquire(&mut config).unwrap();
        assert_eq!(db.active_branch().unwrap(), "feature");
    }
}
