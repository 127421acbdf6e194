//! The table rebuild transaction.
//!
//! A rebuild replaces a table with a new one of a different shape:
//!
//! 1. validate the proposal against the current structure and data;
//! 2. snapshot the dependent indices, views and triggers;
//! 3. open a [`Checkpoint`] savepoint;
//! 4. create the shadow table and copy the rows across in batches;
//! 5. drop the dependents SQLite does not drop on its own, drop the old
//!    table and rename the shadow table into place;
//! 6. recreate the dependents through a [`DependentRewriter`];
//! 7. release the checkpoint.
//!
//! Any error in steps 4 and 5, including cancellation, rolls the checkpoint
//! back and leaves the database as it was. Dependents that cannot be
//! recreated in step 6 do not fail the rebuild; they are returned in
//! [`RebuildOutcome::dependent_failures`] together with their original
//! definition text.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::{Connection, params};
use schema_rebuild_core::{
    CatalogEntry, DependentRewriter, ObjectKind, ProposedTable, RenameSet, RewriteOutcome, TableDefinition,
    TextualRewriter, ValidationVerdict, drop_object_sql, names_match, quote_identifier, rename_table_sql,
    validate_proposed,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{SchemaCatalog, rowid_alias, scan_entry};
use crate::config::EngineConfig;
use crate::error::{RebuildError, Result};
use crate::validator::{blocking_error, validate_change};

/// Shortens statements carrying binary data before they are logged.
///
/// A statement with a control character other than a line break or tab is
/// cut to its first 32 bytes.
pub(crate) fn loggable(sql: &str) -> Cow<'_, str> {
    if !sql.bytes().any(|b| b < 32 && !matches!(b, b'\n' | b'\r' | b'\t')) {
        return Cow::Borrowed(sql);
    }
    let mut end = sql.len().min(32);
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}... <binary data not logged>", &sql[..end]))
}

/// Executes `sql` and logs it at debug level.
pub(crate) fn execute_logged(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    debug!(sql = %loggable(sql), "executing statement");
    conn.execute_batch(sql)
}

pub(crate) fn savepoint_sql(name: &str) -> String {
    format!("SAVEPOINT {};", quote_identifier(name))
}

pub(crate) fn release_sql(name: &str) -> String {
    format!("RELEASE {};", quote_identifier(name))
}

pub(crate) fn rollback_sql(name: &str) -> String {
    let name = quote_identifier(name);
    format!("ROLLBACK TO {name}; RELEASE {name};")
}

/// A named savepoint that is rolled back unless explicitly released.
pub(crate) struct Checkpoint<'c> {
    conn: &'c Connection,
    name: String,
    finished: bool,
}

impl<'c> Checkpoint<'c> {
    pub(crate) fn open(conn: &'c Connection, name: &str) -> Result<Self> {
        execute_logged(conn, &savepoint_sql(name))?;
        Ok(Self {
            conn,
            name: name.to_string(),
            finished: false,
        })
    }

    pub(crate) fn release(mut self) -> Result<()> {
        execute_logged(self.conn, &release_sql(&self.name))?;
        self.finished = true;
        Ok(())
    }

    pub(crate) fn rollback(mut self) -> Result<()> {
        execute_logged(self.conn, &rollback_sql(&self.name))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = execute_logged(self.conn, &rollback_sql(&self.name)) {
            warn!(savepoint = %self.name, error = %e, "failed to roll back checkpoint");
        }
    }
}

/// Shared flag for cancelling a running rebuild between copy batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static TEXTUAL_REWRITER: TextualRewriter = TextualRewriter;

/// Collaborators for a single rebuild.
pub struct RebuildOptions<'a> {
    pub rewriter: &'a dyn DependentRewriter,
    pub cancel: CancelToken,
}

impl Default for RebuildOptions<'_> {
    fn default() -> Self {
        Self {
            rewriter: &TEXTUAL_REWRITER,
            cancel: CancelToken::new(),
        }
    }
}

impl<'a> RebuildOptions<'a> {
    pub fn with_rewriter(mut self, rewriter: &'a dyn DependentRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Everything a rebuild decided before touching the database.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildPlan {
    pub old_name: String,
    pub new_name: String,
    /// `(source, target)` column pairs in target order.
    pub column_mapping: Vec<(String, String)>,
    pub dropped_columns: Vec<String>,
    /// Dependents in restore order: indices, views, triggers, each in
    /// creation order.
    pub dependents: Vec<CatalogEntry>,
    pub verdicts: Vec<ValidationVerdict>,
    /// `CONSTRAINT` names the new table will not carry. Only non-empty when
    /// [`EngineConfig::drop_constraint_names`] allows it.
    pub dropped_constraint_names: Vec<String>,
}

impl RebuildPlan {
    /// Returns `true` if no verdict blocks the rebuild.
    pub fn is_allowed(&self) -> bool {
        self.verdicts.iter().all(|v| v.satisfied)
    }
}

/// A dependent object that could not be recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentFailure {
    pub kind: ObjectKind,
    pub name: String,
    /// Definition as it was before the rebuild.
    pub original_sql: String,
    pub reason: String,
}

/// Result of a successful rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildOutcome {
    /// Final table name.
    pub table: String,
    pub rows_copied: u64,
    /// Dependents recreated, in restore order.
    pub restored: Vec<String>,
    pub dependent_failures: Vec<DependentFailure>,
    pub dropped_constraint_names: Vec<String>,
}

impl RebuildOutcome {
    /// Returns `true` if every dependent was recreated.
    pub fn is_clean(&self) -> bool {
        self.dependent_failures.is_empty()
    }

    /// Original definitions of the dependents that were lost, ready to be
    /// edited and re-run by hand.
    pub fn manual_repair_sql(&self) -> String {
        self.dependent_failures
            .iter()
            .map(|f| format!("{};", f.original_sql.trim().trim_end_matches(';')))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn engine(step: &'static str) -> impl Fn(rusqlite::Error) -> RebuildError {
    move |e| RebuildError::Engine {
        step,
        message: e.to_string(),
    }
}

/// Validates a proposal and collects everything the rebuild needs.
///
/// Read-only. Fails with [`RebuildError::Structural`] for proposals that can
/// never be applied; data verdicts are returned in the plan.
pub(crate) fn plan(
    conn: &Connection,
    config: &EngineConfig,
    table: &str,
    proposed: &ProposedTable,
) -> Result<(RebuildPlan, TableDefinition)> {
    let catalog = SchemaCatalog::new(conn);
    let entry = catalog.read_table(table)?;
    let scan = scan_entry(&entry);
    let current = entry
        .table
        .ok_or_else(|| RebuildError::TableNotFound(table.to_string()))?;

    if scan.is_virtual {
        return Err(RebuildError::Structural(format!(
            "virtual table \"{}\" cannot be rebuilt",
            current.name
        )));
    }
    let generated = scan.generated_columns();
    if !generated.is_empty() {
        return Err(RebuildError::Structural(format!(
            "generated columns cannot be carried over: {}",
            generated.join(", ")
        )));
    }
    if !scan.conflict_clauses.is_empty() {
        return Err(RebuildError::Structural(format!(
            "ON CONFLICT clauses cannot be carried over: {}",
            scan.conflict_clauses.join(", ")
        )));
    }
    if !scan.constraint_names.is_empty() && !config.drop_constraint_names {
        return Err(RebuildError::Structural(format!(
            "named constraints cannot be carried over: {}; enable drop_constraint_names to rebuild without the names",
            scan.constraint_names.join(", ")
        )));
    }

    let errors = validate_proposed(proposed, &current);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(RebuildError::Structural(messages.join("; ")));
    }
    if names_match(&proposed.name, &config.shadow_table) {
        return Err(RebuildError::Structural(format!(
            "\"{}\" is reserved for the shadow table",
            proposed.name
        )));
    }
    if !names_match(&proposed.name, &current.name) && catalog.object_exists(&proposed.name)? {
        return Err(RebuildError::Structural(format!(
            "an object named \"{}\" already exists",
            proposed.name
        )));
    }
    if catalog.object_exists(&config.shadow_table)? {
        return Err(RebuildError::Structural(format!(
            "leftover object \"{}\" must be removed first",
            config.shadow_table
        )));
    }

    let verdicts = validate_change(conn, &current, proposed)?;
    let mut dependents = catalog.read_dependents(&current.name)?;
    dependents.sort_by_key(|d| d.kind.restore_rank());

    let plan = RebuildPlan {
        old_name: current.name.clone(),
        new_name: proposed.name.clone(),
        column_mapping: proposed.column_mapping(),
        dropped_columns: proposed.dropped_columns(&current),
        dependents,
        verdicts,
        dropped_constraint_names: scan.constraint_names,
    };
    Ok((plan, current))
}

/// Runs a full rebuild of `table` into the shape of `proposed`.
pub(crate) fn rebuild_table(
    conn: &Connection,
    config: &EngineConfig,
    table: &str,
    proposed: &ProposedTable,
    options: &RebuildOptions<'_>,
) -> Result<RebuildOutcome> {
    let (plan, current) = plan(conn, config, table, proposed)?;
    if let Some(err) = blocking_error(&plan.verdicts) {
        info!(table = %plan.old_name, error = %err, "rebuild rejected");
        return Err(err);
    }
    debug!(
        table = %plan.old_name,
        new_name = %plan.new_name,
        columns = plan.column_mapping.len(),
        dropped = plan.dropped_columns.len(),
        dependents = plan.dependents.len(),
        "starting rebuild"
    );

    let checkpoint = Checkpoint::open(conn, &config.rebuild_savepoint)?;
    match swap_in(conn, config, &plan, &current, proposed, options) {
        Ok(outcome) => {
            checkpoint.release()?;
            info!(
                table = %outcome.table,
                rows = outcome.rows_copied,
                restored = outcome.restored.len(),
                failed = outcome.dependent_failures.len(),
                "table rebuilt"
            );
            Ok(outcome)
        }
        Err(e) => {
            warn!(table = %plan.old_name, error = %e, "rebuild failed, rolling back");
            if let Err(rollback) = checkpoint.rollback() {
                warn!(table = %plan.old_name, error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

fn swap_in(
    conn: &Connection,
    config: &EngineConfig,
    plan: &RebuildPlan,
    current: &TableDefinition,
    proposed: &ProposedTable,
    options: &RebuildOptions<'_>,
) -> Result<RebuildOutcome> {
    let mut shadow = proposed.to_definition();
    shadow.name = config.shadow_table.clone();
    execute_logged(conn, &shadow.create_sql()).map_err(engine("create shadow table"))?;

    let rows_copied = copy_rows(conn, config, current, proposed, &options.cancel)?;

    drop_detached_dependents(conn, plan)?;
    execute_logged(conn, &drop_object_sql(ObjectKind::Table, &current.name))
        .map_err(engine("drop old table"))?;
    rename_shadow(conn, &config.shadow_table, &proposed.name)?;

    let mut renames = proposed.renames(current);
    renames.views = plan
        .dependents
        .iter()
        .filter(|d| d.kind == ObjectKind::View)
        .map(|d| d.name.clone())
        .collect();
    let (restored, dependent_failures) =
        restore_dependents(conn, &plan.dependents, &renames, options.rewriter);

    Ok(RebuildOutcome {
        table: proposed.name.clone(),
        rows_copied,
        restored,
        dependent_failures,
        dropped_constraint_names: plan.dropped_constraint_names.clone(),
    })
}

/// Returns `true` if the sole primary-key column aliases the rowid.
fn has_integer_key(def: &TableDefinition) -> bool {
    let pk = def.primary_key_columns();
    !def.without_rowid && pk.len() == 1 && pk[0].is_integer_primary_key_type()
}

fn copy_rows(
    conn: &Connection,
    config: &EngineConfig,
    current: &TableDefinition,
    proposed: &ProposedTable,
    cancel: &CancelToken,
) -> Result<u64> {
    let mapping = proposed.column_mapping();
    let mut targets: Vec<String> = mapping.iter().map(|(_, t)| quote_identifier(t)).collect();
    let mut sources: Vec<String> = mapping.iter().map(|(s, _)| quote_identifier(s)).collect();
    let source = quote_identifier(&current.name);
    let alias = rowid_alias(current);

    // Carry hidden rowids over when the new table still has them.
    let target = proposed.to_definition();
    if let Some(alias) = alias {
        if !target.without_rowid && !has_integer_key(&target) && target.column(alias).is_none() {
            targets.insert(0, alias.to_string());
            sources.insert(0, alias.to_string());
        }
    }

    let insert = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {source}",
        quote_identifier(&config.shadow_table),
        targets.join(", "),
        sources.join(", ")
    );
    let limit = config.batch_limit();
    let mut copied: u64 = 0;

    match alias {
        Some(alias) => {
            let bound_sql = format!(
                "SELECT MAX(r) FROM (SELECT {alias} AS r FROM {source} \
                 WHERE ?1 IS NULL OR {alias} > ?1 ORDER BY {alias} LIMIT ?2)"
            );
            let batch_sql = format!("{insert} WHERE (?1 IS NULL OR {alias} > ?1) AND {alias} <= ?2");
            debug!(sql = %batch_sql, batch = limit, "copying rows by rowid range");

            let mut lower: Option<i64> = None;
            loop {
                if cancel.is_cancelled() {
                    return Err(RebuildError::Cancelled);
                }
                let upper: Option<i64> = conn
                    .query_row(&bound_sql, params![lower, limit], |row| row.get(0))
                    .map_err(engine("copy rows"))?;
                let Some(upper) = upper else {
                    break;
                };
                let rows = conn
                    .execute(&batch_sql, params![lower, upper])
                    .map_err(engine("copy rows"))?;
                copied += rows as u64;
                debug!(rows, upper, "copied batch");
                lower = Some(upper);
            }
        }
        None => {
            let pk: Vec<String> = current
                .primary_key_columns()
                .iter()
                .map(|c| quote_identifier(&c.name))
                .collect();
            let order = if pk.is_empty() {
                String::new()
            } else {
                format!(" ORDER BY {}", pk.join(", "))
            };
            let batch_sql = format!("{insert}{order} LIMIT ?1 OFFSET ?2");
            debug!(sql = %batch_sql, batch = limit, "copying rows by key order");

            let mut offset: i64 = 0;
            loop {
                if cancel.is_cancelled() {
                    return Err(RebuildError::Cancelled);
                }
                let rows = conn
                    .execute(&batch_sql, params![limit, offset])
                    .map_err(engine("copy rows"))?;
                if rows == 0 {
                    break;
                }
                copied += rows as u64;
                offset += rows as i64;
                debug!(rows, offset, "copied batch");
            }
        }
    }
    Ok(copied)
}

/// Drops the dependents that survive `DROP TABLE`: views, and triggers
/// attached to other tables. Triggers on those views go with the views.
fn drop_detached_dependents(conn: &Connection, plan: &RebuildPlan) -> Result<()> {
    let views: Vec<&CatalogEntry> = plan
        .dependents
        .iter()
        .filter(|d| d.kind == ObjectKind::View)
        .collect();
    let detached_triggers = plan.dependents.iter().filter(|d| {
        d.kind == ObjectKind::Trigger
            && !names_match(&d.table_name, &plan.old_name)
            && !views.iter().any(|v| names_match(&v.name, &d.table_name))
    });

    for dependent in detached_triggers.chain(views.iter().copied()) {
        execute_logged(conn, &drop_object_sql(dependent.kind, &dependent.name))
            .map_err(engine("drop dependents"))?;
    }
    Ok(())
}

/// Renames the shadow table with `legacy_alter_table` switched on, so the
/// engine does not re-check unrelated schema objects.
fn rename_shadow(conn: &Connection, shadow: &str, target: &str) -> Result<()> {
    let legacy: bool = conn.pragma_query_value(None, "legacy_alter_table", |row| row.get(0))?;
    conn.pragma_update(None, "legacy_alter_table", true)?;
    let renamed = execute_logged(conn, &rename_table_sql(shadow, target));
    conn.pragma_update(None, "legacy_alter_table", legacy)?;
    renamed.map_err(engine("rename shadow table"))
}

fn restore_dependents(
    conn: &Connection,
    dependents: &[CatalogEntry],
    renames: &RenameSet,
    rewriter: &dyn DependentRewriter,
) -> (Vec<String>, Vec<DependentFailure>) {
    let mut restored = Vec::new();
    let mut failures = Vec::new();

    for dependent in dependents {
        let original = dependent.sql.clone().unwrap_or_default();
        let failure = match rewriter.rewrite(dependent, renames) {
            RewriteOutcome::Rewritten(sql) => match execute_logged(conn, &sql) {
                Ok(()) => {
                    restored.push(dependent.name.clone());
                    None
                }
                Err(e) => Some((original, e.to_string())),
            },
            RewriteOutcome::Unrecoverable { original: text, reason } => {
                Some((if text.is_empty() { original } else { text }, reason))
            }
        };
        if let Some((original_sql, reason)) = failure {
            warn!(
                kind = %dependent.kind,
                name = %dependent.name,
                reason = %reason,
                "dependent object could not be restored"
            );
            failures.push(DependentFailure {
                kind: dependent.kind,
                name: dependent.name.clone(),
                original_sql,
                reason,
            });
        }
    }
    (restored, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_rebuild_core::ColumnSpec;

    #[test]
    fn test_loggable_keeps_text() {
        let sql = "CREATE TABLE \"t\" (\n\t\"a\"\tTEXT\n);";
        assert!(matches!(loggable(sql), Cow::Borrowed(_)));
    }

    #[test]
    fn test_loggable_truncates_binary() {
        let sql = format!("INSERT INTO t VALUES ('{}')", "\u{1}".repeat(40));
        let logged = loggable(&sql);
        assert!(logged.starts_with("INSERT INTO t VALUES ('\u{1}"));
        assert!(logged.ends_with("<binary data not logged>"));
        assert!(logged.len() < sql.len());
    }

    #[test]
    fn test_checkpoint_drop_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
        {
            let _checkpoint = Checkpoint::open(&conn, "cp").unwrap();
            conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_checkpoint_release_keeps_changes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
        let checkpoint = Checkpoint::open(&conn, "cp").unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        checkpoint.release().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_manual_repair_sql() {
        let outcome = RebuildOutcome {
            table: "t".into(),
            rows_copied: 0,
            restored: vec![],
            dropped_constraint_names: vec![],
            dependent_failures: vec![
                DependentFailure {
                    kind: ObjectKind::Index,
                    name: "i".into(),
                    original_sql: "CREATE INDEX i ON t(a)".into(),
                    reason: "no such column: a".into(),
                },
                DependentFailure {
                    kind: ObjectKind::View,
                    name: "v".into(),
                    original_sql: "CREATE VIEW v AS SELECT a FROM t;".into(),
                    reason: "x".into(),
                },
            ],
        };
        assert!(!outcome.is_clean());
        assert_eq!(
            outcome.manual_repair_sql(),
            "CREATE INDEX i ON t(a);\nCREATE VIEW v AS SELECT a FROM t;"
        );
    }

    #[test]
    fn test_plan_orders_dependents_by_kind() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (a TEXT);
             CREATE VIEW v AS SELECT a FROM t;
             CREATE TRIGGER trg AFTER INSERT ON t BEGIN SELECT 1; END;
             CREATE INDEX i ON t(a);",
        )
        .unwrap();
        let current = SchemaCatalog::new(&conn).read_table("t").unwrap().table.unwrap();
        let proposed = ProposedTable::from_current(&current);
        let (plan, _) = plan(&conn, &EngineConfig::default(), "t", &proposed).unwrap();
        let names: Vec<&str> = plan.dependents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["i", "v", "trg"]);
        assert!(plan.is_allowed());
    }

    #[test]
    fn test_plan_rejects_existing_target_and_shadow() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (a TEXT);
             CREATE TABLE other (b TEXT);",
        )
        .unwrap();
        let current = SchemaCatalog::new(&conn).read_table("t").unwrap().table.unwrap();
        let config = EngineConfig::default();

        let mut proposed = ProposedTable::from_current(&current);
        proposed.rename_table("OTHER");
        assert!(matches!(plan(&conn, &config, "t", &proposed), Err(RebuildError::Structural(_))));

        conn.execute_batch(&format!("CREATE TABLE {} (x)", quote_identifier(&config.shadow_table)))
            .unwrap();
        let proposed = ProposedTable::from_current(&current);
        let err = plan(&conn, &config, "t", &proposed).unwrap_err();
        assert!(err.to_string().contains("leftover"));
    }

    #[test]
    fn test_rowids_survive_rebuild_without_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (a TEXT);
             INSERT INTO t(rowid, a) VALUES (10, 'x'), (20, 'y'), (30, 'z');",
        )
        .unwrap();
        let current = SchemaCatalog::new(&conn).read_table("t").unwrap().table.unwrap();
        let mut proposed = ProposedTable::from_current(&current);
        proposed.add_column(ColumnSpec::new("b", "TEXT"));
        let config = EngineConfig {
            copy_batch_size: 2,
            ..EngineConfig::default()
        };
        let outcome = rebuild_table(&conn, &config, "t", &proposed, &RebuildOptions::default()).unwrap();
        assert_eq!(outcome.rows_copied, 3);
        let rowids: Vec<i64> = conn
            .prepare("SELECT rowid FROM t ORDER BY rowid")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(rowids, vec![10, 20, 30]);
    }

    #[test]
    fn test_plan_refuses_clauses_it_cannot_carry() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE upsert (id INTEGER PRIMARY KEY ON CONFLICT REPLACE, a TEXT);
             CREATE TABLE named (id INTEGER CONSTRAINT pk_named PRIMARY KEY, a TEXT);",
        )
        .unwrap();
        let catalog = SchemaCatalog::new(&conn);
        let config = EngineConfig::default();

        let current = catalog.read_table("upsert").unwrap().table.unwrap();
        let err = plan(&conn, &config, "upsert", &ProposedTable::from_current(&current)).unwrap_err();
        assert!(err.to_string().contains("ON CONFLICT REPLACE"), "{err}");

        let current = catalog.read_table("named").unwrap().table.unwrap();
        let proposed = ProposedTable::from_current(&current);
        let err = plan(&conn, &config, "named", &proposed).unwrap_err();
        assert!(err.to_string().contains("pk_named"), "{err}");

        let lenient = EngineConfig {
            drop_constraint_names: true,
            ..EngineConfig::default()
        };
        let (plan, _) = plan(&conn, &lenient, "named", &proposed).unwrap();
        assert_eq!(plan.dropped_constraint_names, vec!["pk_named".to_string()]);
    }
}
