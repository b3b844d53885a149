//! Branch-mode scopes against the in-memory engine.
//!
//! Covers handle reuse, commit pinning, write batching, key uniqueness,
//! clean-tree preconditions and the runtime gates.

use std::path::Path;
use std::sync::Arc;

use dolt_state::fakes::{MemoryDolt, MemoryHandle};
use dolt_state::{DbConnector, Table, VersionedDb};
use lineage_core::{
    ActionKind, DoltConfig, LineageError, LineageSettings, Scope, StepContext, Strictness,
    UnitOfWork,
};
use serde_json::json;

const PATHSPEC: &str = "VersioningDemo/1611853111934656/start/1";

fn step() -> StepContext {
    StepContext::new("VersioningDemo", "1611853111934656", "start", "1")
}

fn bar(a: i64) -> Table {
    Table::from_rows(["A", "B"], vec![vec![json!(a), json!(a)]]).unwrap()
}

fn commit_bar(db: &mut MemoryHandle, a: i64) -> String {
    db.replace_table("bar", &bar(a), &["A", "B"]).unwrap();
    db.add(&["bar".to_string()]).unwrap();
    db.commit(&format!("bar = {a}"), false).unwrap();
    db.head().unwrap()
}

/// Database at `path` with `bar` committed twice: A=1, then A=2.
fn seeded(path: &str) -> (Arc<MemoryDolt>, MemoryHandle, String, String) {
    let dolt = Arc::new(MemoryDolt::new());
    let mut seed = dolt.create(path).unwrap();
    let first = commit_bar(&mut seed, 1);
    let second = commit_bar(&mut seed, 2);
    (dolt, seed, first, second)
}

fn column_a(table: &Table) -> Vec<i64> {
    table
        .column("A")
        .unwrap()
        .into_iter()
        .map(|v| v.as_i64().unwrap())
        .collect()
}

#[test]
fn read_records_action_at_head() {
    let (dolt, _seed, _, second) = seeded("/branch/read");
    let mut unit = step();
    let config = DoltConfig::new("/branch/read");

    let df = Scope::branch(&mut unit, config, dolt, LineageSettings::default())
        .unwrap()
        .run(|scope| scope.read("bar", None))
        .unwrap();
    assert_eq!(column_a(&df), vec![2]);

    let ledger = unit.ledger().unwrap();
    let action = ledger.action("bar").unwrap();
    assert_eq!(action.kind, ActionKind::Read);
    assert_eq!(action.query.as_deref(), Some("SELECT * FROM `bar`"));
    assert_eq!(action.commit.as_deref(), Some(second.as_str()));
    assert_eq!(action.pathspec, PATHSPEC);
    ledger.validate().unwrap();
}

#[test]
fn handle_is_acquired_once_per_config() {
    let (dolt, _seed, _, _) = seeded("/branch/idempotent");
    let connector: Arc<dyn DbConnector> = dolt.clone();
    let mut unit = step();
    let config = DoltConfig::new("/branch/idempotent");

    Scope::branch(&mut unit, config, connector, LineageSettings::default())
        .unwrap()
        .run(|scope| {
            scope.read("bar", None)?;
            scope.read("bar", Some("bar_again"))?;
            Ok(())
        })
        .unwrap();

    assert_eq!(dolt.open_calls(), 1);
    assert_eq!(dolt.init_calls(), 1);
    assert_eq!(unit.ledger().unwrap().actions.len(), 2);
}

#[test]
fn reads_stay_on_pinned_commit_while_head_moves() {
    let (dolt, seed, _, second) = seeded("/branch/pinned");
    let mut seed = seed;
    let mut unit = step();
    let config = DoltConfig::new("/branch/pinned");

    let mut scope = Scope::branch(&mut unit, config, dolt, LineageSettings::default()).unwrap();
    let before = scope.read("bar", None).unwrap();
    scope.write(&bar(9), "baz", None, None).unwrap();
    let third = commit_bar(&mut seed, 3);
    let after = scope.read("bar", Some("bar_again")).unwrap();
    scope.close().unwrap();
    drop(scope);

    assert_eq!(column_a(&before), vec![2]);
    assert_eq!(column_a(&after), vec![2]);

    let ledger = unit.ledger().unwrap();
    assert_eq!(ledger.action("bar").unwrap().commit.as_deref(), Some(second.as_str()));
    assert_eq!(ledger.action("bar_again").unwrap().commit.as_deref(), Some(second.as_str()));
    let baz_commit = ledger.action("baz").unwrap().commit.clone().unwrap();
    assert_ne!(baz_commit, third);
    assert_ne!(baz_commit, second);
}

#[test]
fn writes_land_in_one_commit() {
    let (dolt, seed, _, _) = seeded("/branch/batch");
    let path = Path::new("/branch/batch");
    let commits_before = dolt.commit_count(path);
    let mut unit = step();
    let config = DoltConfig::new("/branch/batch");

    Scope::branch(&mut unit, config, dolt.clone(), LineageSettings::default())
        .unwrap()
        .run(|scope| {
            scope.write(&bar(5), "baz", None, None)?;
            scope.write(&bar(6), "qux", Some(&["A"][..]), Some("qux_key"))?;
            Ok(())
        })
        .unwrap();

    assert_eq!(dolt.commit_count(path), commits_before + 1);
    let head = seed.head().unwrap();
    let info = seed.find_commit(&head).unwrap().unwrap();
    assert_eq!(info.message, format!("Run: {PATHSPEC}"));
    assert_eq!(seed.changed_tables(&head).unwrap(), vec!["baz", "qux"]);
    assert!(seed.status().unwrap().is_clean());

    let ledger = unit.ledger().unwrap();
    let baz = ledger.action("baz").unwrap();
    let qux = ledger.action("qux_key").unwrap();
    assert_eq!(baz.kind, ActionKind::Write);
    assert_eq!(baz.query.as_deref(), Some("SELECT * FROM `baz`"));
    assert_eq!(baz.commit.as_deref(), Some(head.as_str()));
    assert_eq!(qux.commit.as_deref(), Some(head.as_str()));
    assert_eq!(qux.table_name.as_deref(), Some("qux"));
}

#[test]
fn write_without_keys_uses_all_columns() {
    let (dolt, seed, _, _) = seeded("/branch/allkeys");
    let mut unit = step();
    let config = DoltConfig::new("/branch/allkeys");
    let data = Table::from_rows(
        ["A", "B"],
        vec![
            vec![json!(2), json!(2)],
            vec![json!(2), json!(2)],
            vec![json!(2), json!(null)],
        ],
    )
    .unwrap();

    Scope::branch(&mut unit, config, dolt, LineageSettings::default())
        .unwrap()
        .run(|scope| scope.write(&data, "baz", None, None))
        .unwrap();

    let written = seed.sql("SELECT * FROM `baz`").unwrap();
    assert_eq!(written.columns(), ["index", "A", "B"]);
    assert_eq!(column_a(&written), vec![2, 2]);
}

#[test]
fn duplicate_keys_are_rejected_before_side_effects() {
    let (dolt, seed, _, _) = seeded("/branch/duplicate");
    let mut unit = step();
    let config = DoltConfig::new("/branch/duplicate");

    let mut scope = Scope::branch(&mut unit, config, dolt, LineageSettings::default()).unwrap();
    scope.read("bar", None).unwrap();
    assert!(matches!(
        scope.read("bar", None),
        Err(LineageError::DuplicateKey(ref k)) if k == "bar"
    ));

    scope.write(&bar(4), "baz", None, None).unwrap();
    assert!(matches!(
        scope.write(&bar(4), "qux", None, Some("baz")),
        Err(LineageError::DuplicateKey(_))
    ));
    assert!(!seed.tables().unwrap().contains(&"qux".to_string()));
    scope.close().unwrap();
}

#[test]
fn dirty_working_tree_is_rejected() {
    let (dolt, seed, _, _) = seeded("/branch/dirty");
    let mut seed = seed;
    seed.replace_table("bar", &bar(7), &["A", "B"]).unwrap();
    let opens_before = dolt.open_calls();
    let mut unit = step();
    let config = DoltConfig::new("/branch/dirty");

    let err = Scope::branch(&mut unit, config, dolt.clone(), LineageSettings::default())
        .err()
        .unwrap();
    match err {
        LineageError::DirtyWorkingTree { tables, .. } => assert_eq!(tables, vec!["bar"]),
        other => panic!("expected DirtyWorkingTree, got {other}"),
    }
    assert_eq!(dolt.open_calls(), opens_before + 1);
    assert!(unit.ledger().is_none());
}

#[test]
fn missing_branch_is_rejected() {
    let (dolt, _seed, _, _) = seeded("/branch/nobranch");
    let mut unit = step();
    let config = DoltConfig::new("/branch/nobranch").with_branch("feature");
    let err = Scope::branch(&mut unit, config, dolt, LineageSettings::default())
        .err()
        .unwrap();
    assert!(matches!(err, LineageError::BranchNotFound { ref branch } if branch == "feature"));
}

#[test]
fn sql_reads_at_explicit_commit() {
    let (dolt, _seed, first, _) = seeded("/branch/sql");
    let mut unit = step();
    let config = DoltConfig::new("/branch/sql").with_commit(first.clone());

    let df = Scope::branch(&mut unit, config, dolt, LineageSettings::default())
        .unwrap()
        .run(|scope| scope.sql("SELECT * FROM `bar` LIMIT 2", "akey"))
        .unwrap();
    assert_eq!(column_a(&df), vec![1]);

    let action = unit.ledger().unwrap().action("akey").unwrap().clone();
    assert_eq!(action.kind, ActionKind::Read);
    assert_eq!(action.query.as_deref(), Some("SELECT * FROM `bar` LIMIT 2"));
    assert_eq!(action.commit.as_deref(), Some(first.as_str()));
    assert!(action.table_name.is_none());
}

#[test]
fn returned_table_bound_on_unit_names_the_action() {
    let (dolt, _seed, _, _) = seeded("/branch/artifact");
    let mut unit = step();
    let config = DoltConfig::new("/branch/artifact");

    Scope::branch(&mut unit, config, dolt, LineageSettings::default())
        .unwrap()
        .run(|scope| {
            let df = scope.read("bar", None)?;
            scope.unit_mut().bind("df", df);
            Ok(())
        })
        .unwrap();

    let action = unit.ledger().unwrap().action("bar").unwrap().clone();
    assert_eq!(action.artifact_name.as_deref(), Some("df"));
}

#[test]
fn diff_returns_one_table_per_name() {
    let (dolt, _seed, first, second) = seeded("/branch/diff");
    let mut unit = step();
    let config = DoltConfig::new("/branch/diff");

    let mut scope = Scope::branch(&mut unit, config, dolt, LineageSettings::default()).unwrap();
    let diffs = scope.diff(&first, &second, &["bar"]).unwrap();
    scope.close().unwrap();
    drop(scope);

    let bar_diff = &diffs["bar"];
    let kinds: Vec<_> = bar_diff
        .column("diff_type")
        .unwrap()
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["added", "removed"]);
    assert!(unit.ledger().is_none());
}

#[test]
fn push_on_commit_pushes_branch() {
    let (dolt, _seed, _, _) = seeded("/branch/push");
    let mut unit = step();
    let config = DoltConfig::new("/branch/push").with_push_on_commit(true);
    let settings = LineageSettings::default().with_remote("dolthub");

    Scope::branch(&mut unit, config, dolt.clone(), settings)
        .unwrap()
        .run(|scope| scope.write(&bar(8), "baz", None, None))
        .unwrap();

    assert_eq!(
        dolt.pushes(Path::new("/branch/push")),
        vec![("dolthub".to_string(), "main".to_string())]
    );
}

#[test]
fn reads_without_writes_do_not_commit() {
    let (dolt, _seed, _, _) = seeded("/branch/readonly");
    let path = Path::new("/branch/readonly");
    let before = dolt.commit_count(path);
    let mut unit = step();
    let config = DoltConfig::new("/branch/readonly");

    Scope::branch(&mut unit, config, dolt.clone(), LineageSettings::default())
        .unwrap()
        .run(|scope| scope.read("bar", None))
        .unwrap();
    assert_eq!(dolt.commit_count(path), before);
}

#[test]
fn trace_unit_finds_writing_step() {
    let (dolt, _seed, _, second) = seeded("/branch/trace");
    let mut unit = step();
    Scope::branch(
        &mut unit,
        DoltConfig::new("/branch/trace"),
        dolt.clone(),
        LineageSettings::default(),
    )
    .unwrap()
    .run(|scope| scope.write(&bar(3), "baz", None, None))
    .unwrap();

    let mut later = StepContext::new("Downstream", "99", "train", "4");
    let mut scope = Scope::branch(
        &mut later,
        DoltConfig::new("/branch/trace"),
        dolt,
        LineageSettings::default(),
    )
    .unwrap();
    assert_eq!(scope.trace_unit("baz", None, None).unwrap(), PATHSPEC);
    assert!(matches!(
        scope.trace_unit("bar", None, None),
        Err(LineageError::TableNotChanged { .. })
    ));
    assert!(matches!(
        scope.trace_unit("bar", None, Some(second.as_str())),
        Err(LineageError::CommitNotFromUnit(_))
    ));
    scope.close().unwrap();
}

#[test]
fn write_outside_running_unit_follows_strictness() {
    let (dolt, seed, _, _) = seeded("/branch/runtime");
    let mut idle = StepContext::inactive("VersioningDemo", "1", "start", "1");

    let mut scope = Scope::branch(
        &mut idle,
        DoltConfig::new("/branch/runtime"),
        dolt.clone(),
        LineageSettings::default(),
    )
    .unwrap();
    assert!(matches!(
        scope.write(&bar(2), "baz", None, None),
        Err(LineageError::RuntimeOnly { operation: "write" })
    ));
    drop(scope);

    let permissive = LineageSettings::default().with_strictness(Strictness::Warn);
    let mut scope = Scope::branch(
        &mut idle,
        DoltConfig::new("/branch/runtime"),
        dolt,
        permissive,
    )
    .unwrap();
    scope.write(&bar(2), "baz", None, None).unwrap();
    let df = scope.read("bar", None).unwrap();
    scope.close().unwrap();
    drop(scope);

    assert_eq!(column_a(&df), vec![2]);
    assert!(!seed.tables().unwrap().contains(&"baz".to_string()));
    assert!(idle.ledger().is_none());
}

#[test]
fn run_requires_running_unit_when_strict() {
    let (dolt, _seed, _, _) = seeded("/branch/enter");
    let mut idle = StepContext::inactive("VersioningDemo", "1", "start", "1");
    let err = Scope::branch(
        &mut idle,
        DoltConfig::new("/branch/enter"),
        dolt,
        LineageSettings::default(),
    )
    .unwrap()
    .run(|_| Ok(()))
    .unwrap_err();
    assert!(matches!(err, LineageError::RuntimeOnly { operation: "scope" }));
}

#[test]
fn failed_closure_still_merges_completed_reads() {
    let (dolt, _seed, _, _) = seeded("/branch/partial");
    let mut unit = step();
    let err = Scope::branch(
        &mut unit,
        DoltConfig::new("/branch/partial"),
        dolt,
        LineageSettings::default(),
    )
    .unwrap()
    .run(|scope| {
        scope.read("bar", None)?;
        scope.read("missing", None)?;
        Ok(())
    })
    .unwrap_err();

    assert!(matches!(err, LineageError::Engine(_)));
    let ledger = unit.ledger().unwrap();
    assert!(ledger.action("bar").is_some());
    assert!(ledger.action("missing").is_none());
}
