//! The database handle.
//!
//! [`Database`] owns the single connection to an SQLite file and is the
//! entry point for every operation. Edits made through it stay pending
//! behind a restore point (an outer savepoint) until they are written with
//! [`release_all`](Database::release_all) or discarded with
//! [`revert_all`](Database::revert_all).
//!
//! # Example
//!
//! ```no_run
//! use schema_rebuild_sqlite::{Database, EngineConfig};
//!
//! let mut db = Database::open("app.db", EngineConfig::default()).unwrap();
//! let outcome = db.rename_column("people", "name", "full_name").unwrap();
//! for failure in &outcome.dependent_failures {
//!     eprintln!("could not restore {} {}: {}", failure.kind, failure.name, failure.reason);
//! }
//! db.release_all().unwrap();
//! ```

use std::io::Read;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use schema_rebuild_core::{
    CatalogEntry, ColumnSpec, ProposedTable, TableDefinition, ValidationVerdict, add_column_sql,
    names_match, quote_literal, rename_table_sql, validate_definition,
};
use tracing::{debug, info, warn};

use crate::catalog::SchemaCatalog;
use crate::config::EngineConfig;
use crate::error::{RebuildError, Result};
use crate::rebuild::{
    self, RebuildOptions, RebuildOutcome, RebuildPlan, execute_logged, release_sql, rollback_sql,
    savepoint_sql,
};
use crate::validator;

const SQLITE_HEADER: &[u8] = b"SQLite format 3";

/// Validates that a pragma name contains only alphanumeric characters and underscores.
fn validate_pragma_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RebuildError::InvalidPragma(name.to_string()));
    }
    Ok(())
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

/// An open database with pending-change tracking.
pub struct Database {
    conn: Connection,
    config: EngineConfig,
    /// Open restore points, outermost first.
    restore_points: Vec<String>,
    /// Foreign-key enforcement was switched off for a rebuild and must be
    /// switched back on when the pending changes end.
    foreign_keys_suspended: bool,
}

impl Database {
    /// Opens an existing database file.
    ///
    /// # Errors
    ///
    /// Returns [`RebuildError::Io`] if the file cannot be read and
    /// [`RebuildError::InvalidDatabase`] if it does not start with the
    /// SQLite 3 header.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let mut header = [0u8; 16];
        let mut file = std::fs::File::open(path)?;
        let read = file.read(&mut header)?;
        if !header[..read].starts_with(SQLITE_HEADER) {
            return Err(RebuildError::InvalidDatabase(format!(
                "{} is not a SQLite 3 database",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!(path = %path.display(), "opened database");
        Self::from_connection(conn, config)
    }

    /// Creates a new database file, failing if it already exists.
    pub fn create(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(RebuildError::InvalidDatabase(format!(
                "{} already exists",
                path.display()
            )));
        }
        let conn = Connection::open(path)?;
        // Writes the header so the file can be reopened with `open`.
        conn.execute_batch("PRAGMA user_version = 0; VACUUM;")?;
        info!(path = %path.display(), "created database");
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    /// Wraps an existing connection and applies the configured foreign-key
    /// setting.
    pub fn from_connection(conn: Connection, config: EngineConfig) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        Ok(Self {
            conn,
            config,
            restore_points: Vec::new(),
            foreign_keys_suspended: false,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` while there are unwritten changes.
    pub fn is_dirty(&self) -> bool {
        !self.restore_points.is_empty()
    }

    /// Names of the open restore points, outermost first.
    pub fn restore_points(&self) -> &[String] {
        &self.restore_points
    }

    /// Consumes the handle. Pending changes are rolled back first.
    pub fn into_connection(mut self) -> Result<Connection> {
        self.revert_all()?;
        let Self { conn, .. } = self;
        Ok(conn)
    }

    // --- restore points ---

    /// Opens a restore point. Opening one that is already open is a no-op.
    pub fn set_restore_point(&mut self, name: &str) -> Result<()> {
        if self.restore_points.iter().any(|p| p == name) {
            return Ok(());
        }
        execute_logged(&self.conn, &savepoint_sql(name))?;
        self.restore_points.push(name.to_string());
        debug!(restore_point = %name, "restore point set");
        Ok(())
    }

    fn restore_point_index(&self, name: &str) -> Result<usize> {
        self.restore_points
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| RebuildError::RestorePoint(name.to_string()))
    }

    /// Keeps the changes made since `name` and closes it, together with any
    /// restore point opened after it.
    ///
    /// # Errors
    ///
    /// Releasing the outermost restore point writes to the database file.
    /// If foreign-key enforcement was suspended for a rebuild, the pending
    /// changes are checked first and [`RebuildError::ForeignKeyViolation`]
    /// is returned without writing anything.
    pub fn release(&mut self, name: &str) -> Result<()> {
        let index = self.restore_point_index(name)?;
        if index == 0 && self.foreign_keys_suspended {
            self.check_foreign_keys()?;
        }
        execute_logged(&self.conn, &release_sql(name))?;
        self.restore_points.truncate(index);
        self.resume_foreign_keys()
    }

    /// Discards the changes made since `name` and closes it, together with
    /// any restore point opened after it.
    pub fn revert(&mut self, name: &str) -> Result<()> {
        let index = self.restore_point_index(name)?;
        execute_logged(&self.conn, &rollback_sql(name))?;
        self.restore_points.truncate(index);
        self.resume_foreign_keys()
    }

    /// Writes every pending change to the database file.
    ///
    /// # Errors
    ///
    /// Returns [`RebuildError::ForeignKeyViolation`] if enforcement was
    /// suspended for a rebuild and the pending changes violate a foreign
    /// key. Nothing is written in that case.
    pub fn release_all(&mut self) -> Result<()> {
        let Some(outermost) = self.restore_points.first().cloned() else {
            return Ok(());
        };
        self.release(&outermost)?;
        info!("pending changes written");
        Ok(())
    }

    /// Discards every pending change.
    pub fn revert_all(&mut self) -> Result<()> {
        if let Some(outermost) = self.restore_points.first().cloned() {
            self.revert(&outermost)?;
            info!("pending changes reverted");
        }
        self.resume_foreign_keys()
    }

    fn check_foreign_keys(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
        let violations: Vec<(String, Option<i64>, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
        let Some((table, rowid, parent)) = violations.first() else {
            return Ok(());
        };
        let row = rowid.map_or_else(String::new, |r| format!(" row {r}"));
        Err(RebuildError::ForeignKeyViolation(format!(
            "{} violation(s), first in {table}{row} referencing {parent}",
            violations.len()
        )))
    }

    fn resume_foreign_keys(&mut self) -> Result<()> {
        if self.foreign_keys_suspended && self.conn.is_autocommit() {
            self.conn.pragma_update(None, "foreign_keys", true)?;
            self.foreign_keys_suspended = false;
            debug!("foreign key enforcement resumed");
        }
        Ok(())
    }

    /// Runs `op` with the pending restore point open. If `op` fails and the
    /// restore point was opened for it, the restore point is reverted.
    fn mutate<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let opened = !self.is_dirty();
        let restore_point = self.config.restore_point.clone();
        self.set_restore_point(&restore_point)?;
        let result = op(self);
        if result.is_err() && opened {
            if let Err(e) = self.revert_all() {
                warn!(error = %e, "failed to revert restore point after error");
            }
        }
        result
    }

    // --- statements and pragmas ---

    /// Executes statements that change the database, as a pending edit.
    pub fn execute(&mut self, sql: &str) -> Result<()> {
        self.mutate(|db| Ok(execute_logged(&db.conn, sql)?))
    }

    /// Reads a pragma value as text. Pragmas without output yield `""`.
    pub fn pragma(&self, name: &str) -> Result<String> {
        validate_pragma_name(name)?;
        let sql = format!("PRAGMA {name}");
        debug!(sql = %sql, "reading pragma");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(value_to_string(row.get_ref(0)?)),
            None => {
                warn!(pragma = %name, "pragma returned no value");
                Ok(String::new())
            }
        }
    }

    /// Sets a pragma. Pending changes are written first, since most pragmas
    /// cannot be changed inside a transaction.
    pub fn set_pragma(&mut self, name: &str, value: &str) -> Result<()> {
        validate_pragma_name(name)?;
        self.release_all()?;
        execute_logged(&self.conn, &format!("PRAGMA {name} = {}", quote_literal(value)))?;
        if name.eq_ignore_ascii_case("foreign_keys") {
            self.foreign_keys_suspended = false;
        }
        Ok(())
    }

    fn foreign_keys_enabled(&self) -> Result<bool> {
        Ok(self.conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?)
    }

    // --- catalog ---

    pub fn objects(&self) -> Result<Vec<CatalogEntry>> {
        SchemaCatalog::new(&self.conn).objects()
    }

    pub fn read_table(&self, name: &str) -> Result<CatalogEntry> {
        SchemaCatalog::new(&self.conn).read_table(name)
    }

    pub fn read_dependents(&self, table: &str) -> Result<Vec<CatalogEntry>> {
        SchemaCatalog::new(&self.conn).read_dependents(table)
    }

    fn table_definition(&self, name: &str) -> Result<TableDefinition> {
        self.read_table(name)?
            .table
            .ok_or_else(|| RebuildError::TableNotFound(name.to_string()))
    }

    // --- simple DDL ---

    /// Creates a table as a pending edit.
    pub fn create_table(&mut self, def: &TableDefinition) -> Result<()> {
        let errors = validate_definition(def);
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(RebuildError::Structural(messages.join("; ")));
        }
        let sql = def.create_sql();
        self.mutate(|db| Ok(execute_logged(&db.conn, &sql)?))
    }

    /// Appends a column with `ALTER TABLE ... ADD COLUMN`.
    pub fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<()> {
        let def = self.table_definition(table)?;
        if def.column(&column.name).is_some() {
            return Err(RebuildError::Structural(format!(
                "column \"{}\" already exists in {}",
                column.name, def.name
            )));
        }
        let sql = add_column_sql(&def.name, column);
        self.mutate(|db| Ok(execute_logged(&db.conn, &sql)?))
    }

    /// Renames a table with the engine's own `ALTER TABLE ... RENAME TO`.
    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        let def = self.table_definition(from)?;
        let catalog = SchemaCatalog::new(&self.conn);
        if !names_match(from, to) && catalog.object_exists(to)? {
            return Err(RebuildError::Structural(format!("an object named \"{to}\" already exists")));
        }
        let sql = rename_table_sql(&def.name, to);
        self.mutate(|db| Ok(execute_logged(&db.conn, &sql)?))
    }

    // --- rebuilds ---

    /// Returns the verdicts for applying `proposed` to `table`. Read-only.
    pub fn validate_change(&self, table: &str, proposed: &ProposedTable) -> Result<Vec<ValidationVerdict>> {
        let current = self.table_definition(table)?;
        validator::validate_change(&self.conn, &current, proposed)
    }

    /// Works out what a rebuild would do without changing anything.
    pub fn plan_rebuild(&self, table: &str, proposed: &ProposedTable) -> Result<RebuildPlan> {
        let (plan, _) = rebuild::plan(&self.conn, &self.config, table, proposed)?;
        Ok(plan)
    }

    /// Rebuilds `table` into the shape of `proposed`, as a pending edit.
    pub fn rebuild_table(&mut self, table: &str, proposed: &ProposedTable) -> Result<RebuildOutcome> {
        self.rebuild_table_with(table, proposed, &RebuildOptions::default())
    }

    /// [`rebuild_table`](Self::rebuild_table) with a custom rewriter or
    /// cancel token.
    pub fn rebuild_table_with(
        &mut self,
        table: &str,
        proposed: &ProposedTable,
        options: &RebuildOptions<'_>,
    ) -> Result<RebuildOutcome> {
        self.suspend_foreign_keys_for(table)?;
        self.mutate(|db| rebuild::rebuild_table(&db.conn, &db.config, table, proposed, options))
    }

    /// Switches enforcement off when dropping `table` would fire foreign-key
    /// actions in other tables.
    fn suspend_foreign_keys_for(&mut self, table: &str) -> Result<()> {
        if self.foreign_keys_suspended || !self.foreign_keys_enabled()? {
            return Ok(());
        }
        // Dropping the old table deletes its rows first, and a self-reference
        // would cascade that delete into the shadow copy.
        let catalog = SchemaCatalog::new(&self.conn);
        if catalog.referencing_foreign_keys(table)?.is_empty() && !catalog.references_itself(table)? {
            return Ok(());
        }
        if self.is_dirty() {
            return Err(RebuildError::Structural(format!(
                "\"{table}\" is referenced by foreign keys and enforcement cannot be suspended \
                 while changes are pending; write or revert them first"
            )));
        }
        self.conn.pragma_update(None, "foreign_keys", false)?;
        self.foreign_keys_suspended = true;
        debug!(table = %table, "foreign key enforcement suspended");
        Ok(())
    }

    /// Renames one column through a full rebuild, so dependents follow.
    pub fn rename_column(&mut self, table: &str, column: &str, new_name: &str) -> Result<RebuildOutcome> {
        let current = self.table_definition(table)?;
        if current.column(column).is_none() {
            return Err(RebuildError::ColumnNotFound {
                table: current.name,
                column: column.to_string(),
            });
        }
        if !names_match(column, new_name) && current.column(new_name).is_some() {
            return Err(RebuildError::Structural(format!(
                "column \"{new_name}\" already exists in {}",
                current.name
            )));
        }
        let mut proposed = ProposedTable::from_current(&current);
        proposed.rename_column(column, new_name);
        self.rebuild_table(&current.name, &proposed)
    }

    /// Removes one column through a full rebuild.
    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<RebuildOutcome> {
        let current = self.table_definition(table)?;
        let mut proposed = ProposedTable::from_current(&current);
        if !proposed.drop_column(column) {
            return Err(RebuildError::ColumnNotFound {
                table: current.name,
                column: column.to_string(),
            });
        }
        self.rebuild_table(&current.name, &proposed)
    }

    /// Moves one column by `offset` positions through a full rebuild.
    pub fn move_column(&mut self, table: &str, column: &str, offset: isize) -> Result<RebuildOutcome> {
        let current = self.table_definition(table)?;
        if current.column(column).is_none() {
            return Err(RebuildError::ColumnNotFound {
                table: current.name,
                column: column.to_string(),
            });
        }
        let mut proposed = ProposedTable::from_current(&current);
        if !proposed.move_column(column, offset) {
            return Err(RebuildError::Structural(format!(
                "cannot move \"{column}\" by {offset} in a table of {} columns",
                current.columns.len()
            )));
        }
        self.rebuild_table(&current.name, &proposed)
    }
}
