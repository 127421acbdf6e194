use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use schema_rebuild_sqlite::{Database, EngineConfig, ProposedTable, RebuildOutcome, RebuildPlan};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sqlb-rebuild")]
#[command(about = "Inspect SQLite tables and change their structure with transactional rebuilds")]
struct Cli {
    /// Engine configuration YAML (batch size, savepoint names, foreign keys).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter, e.g. `info` or `schema_rebuild_sqlite=debug`.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the catalog, or one table with its dependents, as JSON.
    Inspect(InspectArgs),
    /// Check whether current rows satisfy new constraints, without changing anything.
    Validate(ValidateArgs),
    /// Rename a column; indices, views and triggers follow.
    RenameColumn(RenameColumnArgs),
    /// Remove a column.
    DropColumn(ColumnArgs),
    /// Move a column by a number of positions.
    MoveColumn(MoveColumnArgs),
    /// Change a column's declared type.
    RetypeColumn(RetypeColumnArgs),
    /// Rename a table.
    RenameTable(RenameTableArgs),
    /// Read or set a pragma.
    Pragma(PragmaArgs),
}

#[derive(Debug, Args)]
struct TableArgs {
    /// Path to the SQLite database file.
    #[arg(long)]
    db: PathBuf,
    /// Table to operate on.
    #[arg(long)]
    table: String,
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Path to the SQLite database file.
    #[arg(long)]
    db: PathBuf,
    /// Only show this table and the objects depending on it.
    #[arg(long)]
    table: Option<String>,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[command(flatten)]
    target: TableArgs,
    /// Columns that would become NOT NULL.
    #[arg(long = "not-null")]
    not_null: Vec<String>,
    /// Columns that would become UNIQUE.
    #[arg(long)]
    unique: Vec<String>,
    /// Column that would become an AUTOINCREMENT primary key.
    #[arg(long)]
    autoincrement: Option<String>,
    /// Check whether the table could become WITHOUT ROWID.
    #[arg(long)]
    without_rowid: bool,
}

#[derive(Debug, Args)]
struct ColumnArgs {
    #[command(flatten)]
    target: TableArgs,
    /// Column to operate on.
    #[arg(long)]
    column: String,
    /// Print the rebuild plan as JSON instead of applying it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RenameColumnArgs {
    #[command(flatten)]
    column: ColumnArgs,
    /// New column name.
    #[arg(long)]
    to: String,
}

#[derive(Debug, Args)]
struct MoveColumnArgs {
    #[command(flatten)]
    column: ColumnArgs,
    /// Positions to move; negative moves towards the front.
    #[arg(long, allow_hyphen_values = true)]
    offset: isize,
}

#[derive(Debug, Args)]
struct RetypeColumnArgs {
    #[command(flatten)]
    column: ColumnArgs,
    /// New declared type, e.g. `INTEGER` or `VARCHAR(40)`.
    #[arg(long = "type")]
    declared_type: String,
}

#[derive(Debug, Args)]
struct RenameTableArgs {
    #[command(flatten)]
    target: TableArgs,
    /// New table name.
    #[arg(long)]
    to: String,
}

#[derive(Debug, Args)]
struct PragmaArgs {
    /// Path to the SQLite database file.
    #[arg(long)]
    db: PathBuf,
    /// Pragma name.
    name: String,
    /// New value; omit to read the current one.
    value: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Command::Inspect(args) => run_inspect(args, config),
        Command::Validate(args) => run_validate(args, config),
        Command::RenameColumn(args) => run_rename_column(args, config),
        Command::DropColumn(args) => run_drop_column(args, config),
        Command::MoveColumn(args) => run_move_column(args, config),
        Command::RetypeColumn(args) => run_retype_column(args, config),
        Command::RenameTable(args) => run_rename_table(args, config),
        Command::Pragma(args) => run_pragma(args, config),
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn open(path: &Path, config: EngineConfig) -> Result<Database, String> {
    Database::open(path, config).map_err(|e| format!("Failed to open database '{}': {e}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize output: {e}"))?;
    println!("{json}");
    Ok(())
}

fn current_proposal(db: &Database, table: &str) -> Result<ProposedTable, String> {
    let entry = db.read_table(table).map_err(|e| e.to_string())?;
    let current = entry.table.ok_or_else(|| format!("'{table}' is not a table"))?;
    Ok(ProposedTable::from_current(&current))
}

fn run_inspect(args: InspectArgs, config: EngineConfig) -> Result<(), String> {
    let db = open(&args.db, config)?;
    match args.table {
        Some(table) => {
            #[derive(Serialize)]
            struct TableReport {
                table: schema_rebuild_sqlite::CatalogEntry,
                dependents: Vec<schema_rebuild_sqlite::CatalogEntry>,
            }
            let report = TableReport {
                table: db.read_table(&table).map_err(|e| e.to_string())?,
                dependents: db.read_dependents(&table).map_err(|e| e.to_string())?,
            };
            print_json(&report)
        }
        None => print_json(&db.objects().map_err(|e| e.to_string())?),
    }
}

fn run_validate(args: ValidateArgs, config: EngineConfig) -> Result<(), String> {
    let db = open(&args.target.db, config)?;
    let table = &args.target.table;
    let mut proposed = current_proposal(&db, table)?;

    let missing = |column: &str| format!("column not found: {table}.{column}");
    for column in &args.not_null {
        proposed.column_mut(column).ok_or_else(|| missing(column))?.not_null = true;
    }
    for column in &args.unique {
        proposed.column_mut(column).ok_or_else(|| missing(column))?.unique = true;
    }
    if let Some(column) = &args.autoincrement {
        let spec = proposed.column_mut(column).ok_or_else(|| missing(column))?;
        spec.primary_key = Some(1);
        spec.autoincrement = true;
    }
    proposed.without_rowid |= args.without_rowid;

    let verdicts = db
        .validate_change(table, &proposed)
        .map_err(|e| format!("Validation failed: {e}"))?;
    print_json(&verdicts)?;

    let violated = verdicts.iter().filter(|v| !v.satisfied).count();
    if violated > 0 {
        return Err(format!("{violated} constraint(s) would be violated"));
    }
    Ok(())
}

/// Plans or applies a rebuild, then writes it to disk.
fn apply(mut db: Database, table: &str, proposed: ProposedTable, dry_run: bool) -> Result<(), String> {
    if dry_run {
        let plan: RebuildPlan = db
            .plan_rebuild(table, &proposed)
            .map_err(|e| format!("Planning failed: {e}"))?;
        return print_json(&plan);
    }
    let outcome = db
        .rebuild_table(table, &proposed)
        .map_err(|e| format!("Rebuild failed: {e}"))?;
    db.release_all()
        .map_err(|e| format!("Failed to write changes: {e}"))?;
    report(&outcome);
    Ok(())
}

fn report(outcome: &RebuildOutcome) {
    println!("Rebuilt '{}':", outcome.table);
    println!("  Rows copied: {}", outcome.rows_copied);
    println!("  Dependents restored: {}", outcome.restored.len());
    if !outcome.dropped_constraint_names.is_empty() {
        eprintln!(
            "Constraint names not carried over: {}",
            outcome.dropped_constraint_names.join(", ")
        );
    }
    if outcome.is_clean() {
        return;
    }
    eprintln!("\nDependents that could not be restored:");
    for failure in &outcome.dependent_failures {
        eprintln!("  {} {}: {}", failure.kind, failure.name, failure.reason);
    }
    eprintln!("\nOriginal definitions:\n{}", outcome.manual_repair_sql());
}

fn run_rename_column(args: RenameColumnArgs, config: EngineConfig) -> Result<(), String> {
    let ColumnArgs { target, column, dry_run } = args.column;
    let db = open(&target.db, config)?;
    let mut proposed = current_proposal(&db, &target.table)?;
    if !proposed.rename_column(&column, &args.to) {
        return Err(format!("column not found: {}.{column}", target.table));
    }
    apply(db, &target.table, proposed, dry_run)
}

fn run_drop_column(args: ColumnArgs, config: EngineConfig) -> Result<(), String> {
    let db = open(&args.target.db, config)?;
    let mut proposed = current_proposal(&db, &args.target.table)?;
    if !proposed.drop_column(&args.column) {
        return Err(format!("column not found: {}.{}", args.target.table, args.column));
    }
    apply(db, &args.target.table, proposed, args.dry_run)
}

fn run_move_column(args: MoveColumnArgs, config: EngineConfig) -> Result<(), String> {
    let ColumnArgs { target, column, dry_run } = args.column;
    let db = open(&target.db, config)?;
    let mut proposed = current_proposal(&db, &target.table)?;
    if !proposed.move_column(&column, args.offset) {
        return Err(format!("cannot move '{column}' by {} in '{}'", args.offset, target.table));
    }
    apply(db, &target.table, proposed, dry_run)
}

fn run_retype_column(args: RetypeColumnArgs, config: EngineConfig) -> Result<(), String> {
    let ColumnArgs { target, column, dry_run } = args.column;
    let db = open(&target.db, config)?;
    let mut proposed = current_proposal(&db, &target.table)?;
    proposed
        .column_mut(&column)
        .ok_or_else(|| format!("column not found: {}.{column}", target.table))?
        .declared_type = args.declared_type;
    apply(db, &target.table, proposed, dry_run)
}

fn run_rename_table(args: RenameTableArgs, config: EngineConfig) -> Result<(), String> {
    let mut db = open(&args.target.db, config)?;
    db.rename_table(&args.target.table, &args.to)
        .map_err(|e| format!("Rename failed: {e}"))?;
    db.release_all()
        .map_err(|e| format!("Failed to write changes: {e}"))?;
    println!("Renamed '{}' to '{}'.", args.target.table, args.to);
    Ok(())
}

fn run_pragma(args: PragmaArgs, config: EngineConfig) -> Result<(), String> {
    let mut db = open(&args.db, config)?;
    if let Some(value) = &args.value {
        db.set_pragma(&args.name, value).map_err(|e| e.to_string())?;
    }
    println!("{}", db.pragma(&args.name).map_err(|e| e.to_string())?);
    Ok(())
}
