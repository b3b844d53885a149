//! Best-effort mapping from returned objects back to the actions that
//! produced them.
//!
//! Every table a scope returns or writes is marked by content digest. When
//! the scope closes, attributes newly bound on the unit of work are hashed
//! the same way; a match names the action's `artifact_name`. Nothing else
//! depends on the annotation being present.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use dolt_state::Table;

use crate::context::UnitOfWork;
use crate::domain::Action;

#[derive(Debug, Default)]
pub struct ObjectCorrelator {
    /// digest -> action key
    marks: HashMap<String, String>,
    start_attributes: BTreeSet<String>,
}

impl ObjectCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the unit's attribute names; later bindings are candidates.
    pub fn begin<U: UnitOfWork + ?Sized>(&mut self, unit: &U) {
        self.start_attributes = unit.attribute_names().into_iter().collect();
    }

    pub fn mark(&mut self, table: &Table, key: &str) {
        self.marks.insert(table.content_digest(), key.to_string());
    }

    /// Set `artifact_name` on actions whose table was bound under a new name.
    ///
    /// Returns the number of actions annotated.
    pub fn annotate<U: UnitOfWork + ?Sized>(
        &self,
        unit: &U,
        actions: &mut BTreeMap<String, Action>,
    ) -> usize {
        let mut annotated = 0;
        for name in unit.attribute_names() {
            if self.start_attributes.contains(&name) {
                continue;
            }
            let Some(digest) = unit.attribute_digest(&name) else {
                continue;
            };
            let Some(key) = self.marks.get(&digest) else {
                continue;
            };
            if let Some(action) = actions.get_mut(key) {
                debug!(key = %key, artifact = %name, "correlated artifact");
                action.artifact_name = Some(name);
                annotated += 1;
            }
        }
        annotated
    }
}
