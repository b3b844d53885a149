//! Dolt-State: versioned-database boundary for dolt-lineage
//!
//! This crate owns every interaction with the external versioned-database
//! engine. The lineage layer only sees the [`VersionedDb`] and
//! [`DbConnector`] traits and the [`Table`] value type.
//!
//! ## Layer 0 - Engine access
//!
//! Focus: checkout, status, SQL, import and commit primitives, nothing more.
//! Branching, diffing and commit storage belong to the engine itself.
//!
//! ## Key Components
//!
//! - `DoltCli`: subprocess-backed handle on a Dolt database directory
//! - `Table`: rows returned by queries and staged for imports
//! - `fakes::MemoryDolt`: in-memory engine honoring the same contracts

mod cli;
mod engine;
mod error;
pub mod fakes;
mod table;

pub use cli::{
    is_dolt_available, is_dolt_available_at, select_all_query, DoltCli, DoltCliConnector,
    DEFAULT_DOLT_BIN,
};
pub use engine::{
    quote_ident, quote_literal, BranchInfo, CommitInfo, DbConnector, ImportMode, InitOutcome,
    VersionedDb, WorkingStatus,
};
pub use error::DoltError;
pub use table::{Table, INDEX_COLUMN};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, DoltError>;
