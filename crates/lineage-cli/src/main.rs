//! Dolt Lineage CLI
//!
//! The `dolt-lineage` command inspects and replays the audit ledgers that
//! pipeline steps carry, and runs one-off recorded reads against a Dolt
//! database.
//!
//! ## Commands
//!
//! - `show`: List the actions and configs in a ledger
//! - `validate`: Check that every action references a known config
//! - `replay`: Re-read one recorded action at its recorded commit
//! - `read`: Read a table at a branch or commit
//! - `diff`: Row-level diffs between two commits
//! - `trace`: Find the step that last wrote a table
//! - `info`: Engine availability and effective settings

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use dolt_state::{is_dolt_available_at, DbConnector, DoltCliConnector, Table};
use lineage_core::settings::{ENV_BRANCH, ENV_DOLT_BIN, ENV_REMOTE, ENV_STRICTNESS};
use lineage_core::{
    init_tracing, AuditLedger, LineageSettings, Scope, StepContext, Strictness, UnitOfWork,
    METRICS,
};

/// Flow name recorded in the pathspec of actions taken by this binary.
const CLI_FLOW: &str = "dolt-lineage";

#[derive(Parser)]
#[command(name = "dolt-lineage")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Branch-aware lineage and audit replay for Dolt tables", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Fail runtime-only operations outside a running step
    #[arg(long, global = true, conflicts_with = "permissive")]
    strict: bool,

    /// Skip runtime-only operations outside a running step with a warning
    #[arg(long, global = true)]
    permissive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the actions and configs in a ledger file
    Show {
        /// Ledger JSON file
        ledger: PathBuf,
    },

    /// Check a ledger file's invariants
    Validate {
        /// Ledger JSON file
        ledger: PathBuf,
    },

    /// Re-read a recorded action at its recorded commit
    Replay {
        /// Ledger JSON file
        #[arg(long)]
        ledger: PathBuf,

        /// Action key to replay
        #[arg(long)]
        key: String,

        /// Key to record the replayed read under
        #[arg(long)]
        as_key: Option<String>,

        /// Write rows here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the ledger of this invocation
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Read a table at a branch head or a pinned commit
    Read {
        /// Database directory
        #[arg(long, default_value = ".")]
        database: String,

        /// Table to read
        #[arg(long)]
        table: String,

        /// Branch to read from (default: DOLT_LINEAGE_BRANCH or main)
        #[arg(long)]
        branch: Option<String>,

        /// Commit to pin the read to
        #[arg(long)]
        commit: Option<String>,

        /// Write rows here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the ledger of this invocation
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Row-level diffs between two commits
    Diff {
        /// Database directory
        #[arg(long, default_value = ".")]
        database: String,

        /// Starting commit
        #[arg(long)]
        from: String,

        /// Ending commit
        #[arg(long)]
        to: String,

        /// Tables to diff
        #[arg(required = true)]
        tables: Vec<String>,
    },

    /// Show which pipeline step wrote a table
    Trace {
        /// Database directory
        #[arg(long, default_value = ".")]
        database: String,

        /// Table to trace
        #[arg(long)]
        table: String,

        /// Branch whose head is inspected
        #[arg(long)]
        branch: Option<String>,

        /// Commit to inspect instead of the branch head
        #[arg(long)]
        commit: Option<String>,
    },

    /// Show engine availability and effective settings
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let settings = effective_settings(LineageSettings::from_env(), cli.strict, cli.permissive);
    let connector: Arc<dyn DbConnector> =
        Arc::new(DoltCliConnector::new(settings.dolt_bin.clone()));

    let outcome = match cli.command {
        Commands::Show { ledger } => cmd_show(&ledger),
        Commands::Validate { ledger } => cmd_validate(&ledger),
        Commands::Replay {
            ledger,
            key,
            as_key,
            output,
            record,
        } => cmd_replay(
            connector,
            settings,
            &ledger,
            &key,
            as_key.as_deref(),
            output.as_deref(),
            record.as_deref(),
        ),
        Commands::Read {
            database,
            table,
            branch,
            commit,
            output,
            record,
        } => cmd_read(
            connector,
            settings,
            &database,
            &table,
            branch.as_deref(),
            commit.as_deref(),
            output.as_deref(),
            record.as_deref(),
        ),
        Commands::Diff {
            database,
            from,
            to,
            tables,
        } => cmd_diff(connector, settings, &database, &from, &to, &tables),
        Commands::Trace {
            database,
            table,
            branch,
            commit,
        } => cmd_trace(
            connector,
            settings,
            &database,
            &table,
            branch.as_deref(),
            commit.as_deref(),
        ),
        Commands::Info => cmd_info(&settings),
    };

    METRICS.flush();
    outcome
}

fn effective_settings(settings: LineageSettings, strict: bool, permissive: bool) -> LineageSettings {
    if strict {
        settings.with_strictness(Strictness::Fail)
    } else if permissive {
        settings.with_strictness(Strictness::Warn)
    } else {
        settings
    }
}

/// Unit of work for one invocation: `dolt-lineage/<pid>/<command>/1`.
fn cli_step(command: &str) -> StepContext {
    StepContext::new(CLI_FLOW, std::process::id().to_string(), command, "1")
}

// ========== Ledger Commands ==========

fn cmd_show(path: &Path) -> Result<()> {
    let ledger = load_ledger(path)?;

    println!("Actions ({})", ledger.actions.len());
    println!("==========");
    for action in ledger.actions.values() {
        println!(
            "{:<20} {:<5} {:<20} {:<12} {}",
            action.key,
            action.kind,
            action.table_name.as_deref().unwrap_or("-"),
            action.commit.as_deref().map(short_hash).unwrap_or("(pending)"),
            action.pathspec
        );
        if let Some(artifact) = &action.artifact_name {
            println!("    artifact: {}", artifact);
        }
        if action.table_name.is_none() {
            if let Some(query) = &action.query {
                println!("    query: {}", query);
            }
        }
    }

    println!();
    println!("Configs ({})", ledger.configs.len());
    println!("==========");
    for config in ledger.configs.values() {
        println!(
            "{}  {} @ {} ({})",
            config.id,
            config.database,
            config.branch,
            config.commit.as_deref().map(short_hash).unwrap_or("unpinned")
        );
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let ledger = load_ledger(path)?;
    ledger
        .validate()
        .with_context(|| format!("Ledger {:?} failed validation", path))?;
    println!(
        "{:?}: {} actions, {} configs, OK",
        path,
        ledger.actions.len(),
        ledger.configs.len()
    );
    Ok(())
}

// ========== Database Commands ==========

fn cmd_replay(
    connector: Arc<dyn DbConnector>,
    settings: LineageSettings,
    ledger_path: &Path,
    key: &str,
    as_key: Option<&str>,
    output: Option<&Path>,
    record: Option<&Path>,
) -> Result<()> {
    let ledger = load_ledger(ledger_path)?;
    let mut unit = cli_step("replay");
    let table = Scope::audit(&mut unit, ledger, connector, settings)?
        .run(|scope| scope.read(key, as_key))
        .with_context(|| format!("Replay failed for key: {}", key))?;

    emit_json(&table_json(&table), output)?;
    save_record(&mut unit, record)
}

#[allow(clippy::too_many_arguments)]
fn cmd_read(
    connector: Arc<dyn DbConnector>,
    settings: LineageSettings,
    database: &str,
    table: &str,
    branch: Option<&str>,
    commit: Option<&str>,
    output: Option<&Path>,
    record: Option<&Path>,
) -> Result<()> {
    let mut config = settings.config(database);
    if let Some(branch) = branch {
        config = config.with_branch(branch);
    }
    if let Some(commit) = commit {
        config = config.with_commit(commit);
    }

    let mut unit = cli_step("read");
    let rows = Scope::branch(&mut unit, config, connector, settings)
        .with_context(|| format!("Failed to open database: {}", database))?
        .run(|scope| scope.read(table, None))
        .with_context(|| format!("Failed to read table: {}", table))?;

    emit_json(&table_json(&rows), output)?;
    save_record(&mut unit, record)
}

fn cmd_diff(
    connector: Arc<dyn DbConnector>,
    settings: LineageSettings,
    database: &str,
    from: &str,
    to: &str,
    tables: &[String],
) -> Result<()> {
    let names: Vec<&str> = tables.iter().map(String::as_str).collect();
    let config = settings.config(database);
    let mut unit = cli_step("diff");
    let diffs = Scope::branch(&mut unit, config, connector, settings)
        .with_context(|| format!("Failed to open database: {}", database))?
        .run(|scope| scope.diff(from, to, &names))
        .with_context(|| format!("Failed to diff {}..{}", from, to))?;

    let mut out = Map::new();
    for (name, table) in &diffs {
        out.insert(name.clone(), table_json(table));
    }
    emit_json(&Value::Object(out), None)
}

fn cmd_trace(
    connector: Arc<dyn DbConnector>,
    settings: LineageSettings,
    database: &str,
    table: &str,
    branch: Option<&str>,
    commit: Option<&str>,
) -> Result<()> {
    let config = settings.config(database);
    let mut unit = cli_step("trace");
    let pathspec = Scope::branch(&mut unit, config, connector, settings)
        .with_context(|| format!("Failed to open database: {}", database))?
        .run(|scope| scope.trace_unit(table, branch, commit))
        .with_context(|| format!("Failed to trace table: {}", table))?;

    println!("{}", pathspec);
    Ok(())
}

fn cmd_info(settings: &LineageSettings) -> Result<()> {
    println!("Dolt Lineage {}", env!("CARGO_PKG_VERSION"));
    println!("==================");
    println!();

    let available = is_dolt_available_at(&settings.dolt_bin);
    println!(
        "Dolt installed: {} ({})",
        if available { "yes" } else { "no" },
        settings.dolt_bin.display()
    );
    if available {
        if let Ok(output) = std::process::Command::new(&settings.dolt_bin)
            .arg("version")
            .output()
        {
            if output.status.success() {
                let version = String::from_utf8_lossy(&output.stdout);
                println!("Dolt version: {}", version.trim());
            }
        }
    }

    println!();
    println!("Settings:");
    println!("  strictness: {}", settings.strictness);
    println!("  default branch: {}", settings.default_branch);
    println!("  push remote: {}", settings.remote);

    println!();
    println!("Environment Variables:");
    for var in [ENV_STRICTNESS, ENV_BRANCH, ENV_DOLT_BIN, ENV_REMOTE] {
        match std::env::var(var) {
            Ok(value) => println!("  {}: {}", var, value),
            Err(_) => println!("  {}: (not set)", var),
        }
    }
    Ok(())
}

// ========== Helpers ==========

fn load_ledger(path: &Path) -> Result<AuditLedger> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ledger file: {:?}", path))?;
    AuditLedger::from_json(&content).with_context(|| format!("Invalid ledger in {:?}", path))
}

/// Rows as JSON objects, columns in table order.
fn table_json(table: &Table) -> Value {
    Value::Array(
        (0..table.len())
            .filter_map(|i| table.row_map(i))
            .map(Value::Object)
            .collect(),
    )
}

fn emit_json(value: &Value, output: Option<&Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write output: {:?}", path))?;
            info!(path = ?path, "wrote rows");
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn save_record(unit: &mut StepContext, record: Option<&Path>) -> Result<()> {
    let Some(path) = record else {
        return Ok(());
    };
    let ledger = unit.take_ledger().unwrap_or_default();
    std::fs::write(path, ledger.to_json_pretty()?)
        .with_context(|| format!("Failed to write ledger: {:?}", path))?;
    info!(path = ?path, actions = ledger.actions.len(), pathspec = %unit.pathspec(), "saved ledger");
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
