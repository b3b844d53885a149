//! Branch switch strategies for sandboxed reads.
//!
//! A handle is shared by every read in a scope, and each read may target a
//! different commit. [`BranchSwitch::run`] moves the handle to the target,
//! runs the closure, then puts the handle back on its starting branch
//! whether or not the closure succeeded.

use tracing::{debug, warn};

use dolt_state::{BranchInfo, VersionedDb};

use crate::domain::{LineageError, Result};

/// Prefix of temporary branches created for historical reads.
pub const DETACHED_PREFIX: &str = "detached_HEAD_at_";

const SHORT_HASH_LEN: usize = 8;

/// Where a sandboxed operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSwitch {
    /// Check out an existing branch
    Serial { branch: String },
    /// Read a commit: reuse a clean branch already pointing at it, else
    /// create a temporary branch there under a name no branch holds yet
    Detached { commit: String },
}

/// What checkout did, so merge-back can undo exactly that.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Switched {
    Stayed,
    Branch,
    Temporary(String),
}

impl BranchSwitch {
    pub fn serial(branch: impl Into<String>) -> Self {
        BranchSwitch::Serial {
            branch: branch.into(),
        }
    }

    pub fn detached(commit: impl Into<String>) -> Self {
        BranchSwitch::Detached {
            commit: commit.into(),
        }
    }

    /// Run `f` at this switch's target, then restore the starting branch.
    ///
    /// The closure's error wins over a restore error; the latter is logged.
    pub fn run<T, F>(&self, db: &mut dyn VersionedDb, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn VersionedDb) -> Result<T>,
    {
        let start = db.active_branch()?;
        let switched = self.checkout(db, &start)?;
        let outcome = f(db);
        let restored = merge_back(db, &start, &switched);
        match (outcome, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                warn!(branch = %start, error = %restore, "failed to restore branch after error");
                Err(e)
            }
        }
    }

    fn checkout(&self, db: &mut dyn VersionedDb, start: &str) -> Result<Switched> {
        match self {
            BranchSwitch::Serial { branch } => {
                if branch == start {
                    return Ok(Switched::Stayed);
                }
                if !db.branches()?.iter().any(|b| &b.name == branch) {
                    return Err(LineageError::BranchNotFound {
                        branch: branch.clone(),
                    });
                }
                db.checkout(branch)?;
                Ok(Switched::Branch)
            }
            BranchSwitch::Detached { commit } => {
                if db.head()? == *commit && db.status()?.is_clean() {
                    return Ok(Switched::Stayed);
                }
                let branches = db.branches()?;
                let existing = branches
                    .iter()
                    .find(|b| &b.hash == commit && b.name != start);
                if let Some(existing) = existing {
                    db.checkout(&existing.name)?;
                    if db.status()?.is_clean() {
                        debug!(branch = %existing.name, commit = %commit, "reading via existing branch");
                        return Ok(Switched::Branch);
                    }
                    db.checkout(start)?;
                }

                let temp = unused_branch_name(&temporary_branch_name(commit), &branches);
                debug!(branch = %temp, commit = %commit, "creating temporary branch");
                db.create_branch(&temp, commit)?;
                Ok(Switched::Temporary(temp))
            }
        }
    }
}

fn merge_back(db: &mut dyn VersionedDb, start: &str, switched: &Switched) -> Result<()> {
    match switched {
        Switched::Stayed => Ok(()),
        Switched::Branch => Ok(db.checkout(start)?),
        Switched::Temporary(temp) => {
            db.checkout(start)?;
            db.delete_branch(temp)?;
            Ok(())
        }
    }
}

/// `detached_HEAD_at_<short hash>`.
pub fn temporary_branch_name(commit: &str) -> String {
    let short: String = commit.chars().take(SHORT_HASH_LEN).collect();
    format!("{DETACHED_PREFIX}{short}")
}

/// `base`, or `base_<n>` for the smallest `n` no existing branch uses.
fn unused_branch_name(base: &str, branches: &[BranchInfo]) -> String {
    let taken = |name: &str| branches.iter().any(|b| b.name == name);
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
