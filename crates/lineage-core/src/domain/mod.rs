//! Domain models for dolt-lineage.
//!
//! Canonical definitions for the persisted entities:
//! - `Action`: one recorded read or write
//! - `DoltConfig`: the database, branch and commit an action went through
//! - `AuditLedger`: actions and configs carried by a unit of work

pub mod action;
pub mod config;
pub mod digest;
pub mod error;
pub mod ledger;

pub use action::{now_micros, Action, ActionKind};
pub use config::{DoltConfig, DEFAULT_BRANCH, DEFAULT_DATABASE};
pub use digest::{canonical_json, value_digest};
pub use error::{LineageError, Result};
pub use ledger::AuditLedger;
