//! Live checks against the `dolt` executable.
//!
//! Each test returns early when `dolt` is not installed, or when the local
//! installation cannot create a database (for example no user identity is
//! configured).

use dolt_state::{
    is_dolt_available, select_all_query, DbConnector, DoltCliConnector, ImportMode, InitOutcome,
    Table, VersionedDb,
};
use serde_json::json;

fn live_database() -> Option<(tempfile::TempDir, Box<dyn VersionedDb>)> {
    if !is_dolt_available() {
        eprintln!("dolt not installed; skipping");
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    let connector = DoltCliConnector::default();
    if let Err(e) = connector.init(dir.path()) {
        eprintln!("dolt init failed ({e}); skipping");
        return None;
    }
    let db = connector.open(dir.path()).unwrap();
    Some((dir, db))
}

#[test]
fn init_twice_reports_already_initialized() {
    let Some((dir, _db)) = live_database() else {
        return;
    };
    let connector = DoltCliConnector::default();
    assert_eq!(
        connector.init(dir.path()).unwrap(),
        InitOutcome::AlreadyInitialized
    );
    assert!(connector.is_database(dir.path()));
}

#[test]
fn import_commit_and_read_back() {
    let Some((_dir, mut db)) = live_database() else {
        return;
    };
    assert!(db.status().unwrap().is_clean());

    let data = Table::from_rows(
        ["index", "A", "B"],
        vec![vec![json!(0), json!(1), json!(1)], vec![json!(1), json!(1), json!(1)]],
    )
    .unwrap();
    db.import_table("bar", &data, ImportMode::Create, &["index".to_string()])
        .unwrap();
    assert!(!db.status().unwrap().is_clean());

    let before = db.head().unwrap();
    db.add(&["bar".to_string()]).unwrap();
    db.commit("Initialize bar", false).unwrap();
    let after = db.head().unwrap();
    assert_ne!(before, after);
    assert!(db.status().unwrap().is_clean());

    let read = db.sql(&select_all_query("bar")).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(db.changed_tables(&after).unwrap(), vec!["bar"]);
    assert_eq!(db.log(Some(1)).unwrap()[0].hash, after);
}
