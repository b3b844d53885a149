//! Lineage actions: one record per read or write of versioned data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dolt_state::select_all_query;

use super::config::DoltConfig;

/// Whether an action consumed or produced data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[default]
    Read,
    Write,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Read => write!(f, "read"),
            ActionKind::Write => write!(f, "write"),
        }
    }
}

/// A single data access recorded during a unit of work.
///
/// Immutable once recorded, except that a write's `commit` is filled in
/// after the scope's commit succeeds and `artifact_name` may be attached
/// by the object correlator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique within one ledger
    pub key: String,
    /// Id of the [`DoltConfig`] the access went through
    pub config_id: String,
    /// Identifier of the producing unit of work
    pub pathspec: String,
    #[serde(default)]
    pub table_name: Option<String>,
    /// Commit the data was read at, or written in
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub kind: ActionKind,
    /// Resolved SQL text
    #[serde(default)]
    pub query: Option<String>,
    /// Name the returned object was bound to on the unit of work
    #[serde(default)]
    pub artifact_name: Option<String>,
    #[serde(with = "epoch_seconds", default = "now_micros")]
    pub timestamp: DateTime<Utc>,
}

impl Action {
    fn new(kind: ActionKind, key: impl Into<String>, config: &DoltConfig, pathspec: &str) -> Self {
        Self {
            key: key.into(),
            config_id: config.id.clone(),
            pathspec: pathspec.to_string(),
            table_name: None,
            commit: None,
            kind,
            query: None,
            artifact_name: None,
            timestamp: now_micros(),
        }
    }

    /// Read of a whole table at the config's pinned commit.
    pub fn read_table(
        key: impl Into<String>,
        config: &DoltConfig,
        pathspec: &str,
        table_name: &str,
    ) -> Self {
        let mut action = Self::new(ActionKind::Read, key, config, pathspec);
        action.table_name = Some(table_name.to_string());
        action.query = Some(select_all_query(table_name));
        action.commit = config.commit.clone();
        action
    }

    /// Read of caller-supplied SQL at the config's pinned commit.
    pub fn read_query(
        key: impl Into<String>,
        config: &DoltConfig,
        pathspec: &str,
        query: &str,
    ) -> Self {
        let mut action = Self::new(ActionKind::Read, key, config, pathspec);
        action.query = Some(query.to_string());
        action.commit = config.commit.clone();
        action
    }

    /// Write to a table; the commit stays unresolved until the scope commits.
    pub fn write_table(
        key: impl Into<String>,
        config: &DoltConfig,
        pathspec: &str,
        table_name: &str,
    ) -> Self {
        let mut action = Self::new(ActionKind::Write, key, config, pathspec);
        action.table_name = Some(table_name.to_string());
        action.query = Some(select_all_query(table_name));
        action
    }

    /// Copy of a historical action, re-keyed, that re-reads its data.
    ///
    /// A replayed write becomes a read of the table it wrote. The recorded
    /// commit and producing pathspec are kept so the read resolves against
    /// history.
    pub fn replayed_as(&self, key: impl Into<String>) -> Self {
        let mut action = self.clone();
        action.key = key.into();
        action.artifact_name = None;
        action.timestamp = now_micros();
        if action.kind != ActionKind::Read {
            action.kind = ActionKind::Read;
        }
        if action.query.is_none() {
            action.query = action.table_name.as_deref().map(select_all_query);
        }
        action
    }

    /// Record the commit a write landed in. Reads are left untouched.
    pub fn resolve_commit(&mut self, commit: &str) -> bool {
        if self.kind != ActionKind::Write {
            return false;
        }
        self.commit = Some(commit.to_string());
        true
    }

    pub fn is_write(&self) -> bool {
        self.kind == ActionKind::Write
    }
}

/// Current time truncated to microseconds, the precision the ledger persists.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Timestamps persist as floating-point UNIX seconds.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        let secs = ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1e6;
        s.serialize_f64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(d)?;
        from_f64(secs).ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}")))
    }

    pub fn from_f64(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        let floor = secs.floor();
        let mut whole = floor as i64;
        let mut micros = ((secs - floor) * 1e6).round() as i64;
        if micros >= 1_000_000 {
            whole += 1;
            micros -= 1_000_000;
        }
        DateTime::from_timestamp(whole, (micros * 1_000) as u32)
    }
}
