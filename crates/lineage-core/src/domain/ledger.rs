//! The audit ledger: every action a unit of work recorded, plus the configs
//! those actions went through.
//!
//! The ledger is the one attribute a unit of work carries forward. It
//! persists as JSON shaped `{"actions": {...}, "configs": {...}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::config::DoltConfig;
use super::error::{LineageError, Result};

/// Accumulated mapping of action key to action and config id to config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditLedger {
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
    #[serde(default)]
    pub configs: BTreeMap<String, DoltConfig>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.configs.is_empty()
    }

    pub fn action(&self, key: &str) -> Option<&Action> {
        self.actions.get(key)
    }

    pub fn config(&self, id: &str) -> Option<&DoltConfig> {
        self.configs.get(id)
    }

    /// Check that every action references a known config.
    pub fn validate(&self) -> Result<()> {
        for action in self.actions.values() {
            if !self.configs.contains_key(&action.config_id) {
                return Err(LineageError::UnknownConfig(format!(
                    "{} (action '{}')",
                    action.config_id, action.key
                )));
            }
        }
        Ok(())
    }

    /// Fold one scope's actions and configs into the ledger.
    ///
    /// Later scopes overwrite earlier entries that share a key; within one
    /// scope keys are already unique.
    pub fn merge_scope<A, C>(&mut self, actions: A, configs: C)
    where
        A: IntoIterator<Item = Action>,
        C: IntoIterator<Item = DoltConfig>,
    {
        for config in configs {
            self.configs.insert(config.id.clone(), config);
        }
        for action in actions {
            self.actions.insert(action.key.clone(), action);
        }
    }

    /// Actions recorded through one config, in key order.
    pub fn actions_for_config<'a>(&'a self, config_id: &'a str) -> impl Iterator<Item = &'a Action> {
        self.actions
            .values()
            .filter(move |a| a.config_id == config_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::ActionKind;

    fn sample() -> (AuditLedger, DoltConfig) {
        let config = DoltConfig::new("foo").with_commit("c1");
        let mut ledger = AuditLedger::new();
        ledger.merge_scope(
            vec![
                Action::read_table("bar", &config, "Flow/1/start/1", "bar"),
                Action::write_table("baz", &config, "Flow/1/start/1", "baz"),
            ],
            vec![config.clone()],
        );
        (ledger, config)
    }

    #[test]
    fn json_round_trip_keeps_null_fields() {
        let (ledger, _) = sample();
        let json = ledger.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["actions"]["baz"]["commit"].is_null());
        assert!(value["actions"]["bar"]["artifact_name"].is_null());

        let back = AuditLedger::from_json(&json).unwrap();
        assert_eq!(back, ledger);
    }

    #[test]
    fn validate_rejects_dangling_config() {
        let (mut ledger, config) = sample();
        assert!(ledger.validate().is_ok());

        ledger.configs.remove(&config.id);
        let err = ledger.validate().unwrap_err();
        assert!(matches!(err, LineageError::UnknownConfig(ref id) if id.contains(&config.id)));
    }

    #[test]
    fn merge_overwrites_by_key() {
        let (mut ledger, config) = sample();
        let mut later = Action::read_table("bar", &config, "Flow/2/end/4", "bar");
        later.commit = Some("c2".to_string());
        ledger.merge_scope(vec![later], Vec::new());

        assert_eq!(ledger.actions.len(), 2);
        assert_eq!(ledger.action("bar").unwrap().commit.as_deref(), Some("c2"));
    }

    #[test]
    fn actions_for_config_filters() {
        let (mut ledger, config) = sample();
        let other = DoltConfig::new("elsewhere");
        ledger.merge_scope(
            vec![Action::read_table("qux", &other, "Flow/1/start/1", "qux")],
            vec![other.clone()],
        );

        let keys: Vec<_> = ledger
            .actions_for_config(&config.id)
            .map(|a| a.key.as_str())
            .collect();
        assert_eq!(keys, vec!["bar", "baz"]);
        assert_eq!(ledger.actions_for_config(&other.id).count(), 1);
    }

    #[test]
    fn loads_ledger_written_by_earlier_tooling() {
        let data = r#"{
            "actions": {
                "bar": {
                    "key": "bar",
                    "config_id": "dd9f1f38-6802-4657-b869-602dde993180",
                    "pathspec": "VersioningDemo/1611853111934656/start/1",
                    "table_name": "bar",
                    "kind": "read",
                    "query": "SELECT * FROM `bar`",
                    "commit": "j1q8e5pkdk3v0o4ditk5ro0djpk3lbsn",
                    "artifact_name": null,
                    "timestamp": 1611853112.794624
                }
            },
            "configs": {
                "dd9f1f38-6802-4657-b869-602dde993180": {
                    "id": "dd9f1f38-6802-4657-b869-602dde993180",
                    "database": "foo",
                    "branch": "master",
                    "commit": "j1q8e5pkdk3v0o4ditk5ro0djpk3lbsn",
                    "dolthub_remote": false,
                    "push_on_commit": false
                }
            }
        }"#;
        let ledger = AuditLedger::from_json(data).unwrap();
        ledger.validate().unwrap();
        let bar = ledger.action("bar").unwrap();
        assert_eq!(bar.kind, ActionKind::Read);
        assert_eq!(bar.timestamp.timestamp(), 1611853112);
    }

    #[test]
    fn empty_object_is_empty_ledger() {
        let ledger = AuditLedger::from_json("{}").unwrap();
        assert!(ledger.is_empty());
    }
}
