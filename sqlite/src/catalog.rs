//! Read-only access to the live schema catalog.
//!
//! [`SchemaCatalog`] turns `sqlite_master` rows and the table-info pragmas
//! into [`CatalogEntry`] values. Nothing here is cached: every call queries
//! the connection again, so results always reflect the connection's current
//! transactional view.
//!
//! # Example
//!
//! ```no_run
//! use rusqlite::Connection;
//! use schema_rebuild_sqlite::SchemaCatalog;
//!
//! let conn = Connection::open("app.db").unwrap();
//! let catalog = SchemaCatalog::new(&conn);
//!
//! let people = catalog.read_table("people").unwrap();
//! for column in &people.table.as_ref().unwrap().columns {
//!     println!("{} {}", column.name, column.declared_type);
//! }
//! for dependent in catalog.read_dependents("people").unwrap() {
//!     println!("{} {}", dependent.kind, dependent.name);
//! }
//! ```

use rusqlite::{Connection, OptionalExtension, params};
use schema_rebuild_core::{
    CatalogEntry, ColumnSpec, ForeignKeyRef, ObjectKind, TableDefinition, TableForeignKey, TableScan,
    names_match, quote_identifier, references_identifier, scan_create_table,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RebuildError, Result};

/// A foreign key in another table that points at the inspected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundForeignKey {
    /// Child table holding the foreign key.
    pub table: String,
    /// Child columns.
    pub columns: Vec<String>,
    /// Referenced columns of the inspected table.
    pub parent_columns: Vec<String>,
}

/// Scans the stored definition of a table entry.
///
/// Returns an empty scan for entries without definition text.
pub fn scan_entry(entry: &CatalogEntry) -> TableScan {
    entry
        .sql
        .as_deref()
        .and_then(scan_create_table)
        .unwrap_or_default()
}

/// Returns the first rowid alias not shadowed by a real column, or `None`
/// for WITHOUT ROWID tables and tables that shadow all three.
pub(crate) fn rowid_alias(def: &TableDefinition) -> Option<&'static str> {
    if def.without_rowid {
        return None;
    }
    ["rowid", "_rowid_", "oid"]
        .into_iter()
        .find(|alias| def.column(alias).is_none())
}

/// Read-only view of a connection's schema.
pub struct SchemaCatalog<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaCatalog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Lists every user object in creation order. Table entries carry their
    /// column structure.
    pub fn objects(&self) -> Result<Vec<CatalogEntry>> {
        let mut entries = self.entries()?;
        for entry in entries.iter_mut().filter(|e| e.kind == ObjectKind::Table) {
            match self.read_definition(&entry.name, entry.sql.as_deref()) {
                Ok(def) => entry.table = Some(def),
                Err(e) => warn!(table = %entry.name, error = %e, "could not read table structure"),
            }
        }
        Ok(entries)
    }

    /// Raw catalog rows, internal `sqlite_` objects excluded.
    fn entries(&self) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(
            r"SELECT type, name, tbl_name, sql FROM sqlite_master
              WHERE name NOT LIKE 'sqlite\_%' ESCAPE '\'
              ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (kind, name, table_name, sql) = row?;
            let Some(kind) = ObjectKind::from_catalog(&kind) else {
                debug!(kind = %kind, name = %name, "skipping unknown catalog object");
                continue;
            };
            entries.push(CatalogEntry {
                kind,
                name,
                table_name,
                sql,
                table: None,
            });
        }
        Ok(entries)
    }

    /// Returns `true` if any schema object is called `name`.
    pub fn object_exists(&self, name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE name = ?1 COLLATE NOCASE",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Reads one table, including its column structure.
    ///
    /// # Errors
    ///
    /// Returns [`RebuildError::TableNotFound`] if no table is called `name`.
    pub fn read_table(&self, name: &str) -> Result<CatalogEntry> {
        let mut entry = self
            .entries()?
            .into_iter()
            .find(|e| e.kind == ObjectKind::Table && names_match(&e.name, name))
            .ok_or_else(|| RebuildError::TableNotFound(name.to_string()))?;
        entry.table = Some(self.read_definition(&entry.name, entry.sql.as_deref())?);
        Ok(entry)
    }

    /// Reads the indices, views and triggers that depend on `table`, in
    /// creation order.
    ///
    /// Besides the objects attached to the table, this includes views and
    /// triggers elsewhere whose text mentions the table, and the triggers
    /// attached to those views. Automatic indices are skipped.
    pub fn read_dependents(&self, table: &str) -> Result<Vec<CatalogEntry>> {
        let entries = self.entries()?;
        let table = entries
            .iter()
            .find(|e| e.kind == ObjectKind::Table && names_match(&e.name, table))
            .map(|e| e.name.clone())
            .ok_or_else(|| RebuildError::TableNotFound(table.to_string()))?;

        let mut selected = vec![false; entries.len()];
        let mut views = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let Some(sql) = entry.sql.as_deref() else {
                continue;
            };
            selected[i] = match entry.kind {
                ObjectKind::Table => false,
                ObjectKind::Index => names_match(&entry.table_name, &table),
                ObjectKind::Trigger => {
                    names_match(&entry.table_name, &table) || references_identifier(sql, &table)
                }
                ObjectKind::View => references_identifier(sql, &table),
            };
            if selected[i] && entry.kind == ObjectKind::View {
                views.push(entry.name.clone());
            }
        }
        for (i, entry) in entries.iter().enumerate() {
            if entry.kind == ObjectKind::Trigger
                && entry.sql.is_some()
                && views.iter().any(|v| names_match(v, &entry.table_name))
            {
                selected[i] = true;
            }
        }

        Ok(entries
            .into_iter()
            .zip(selected)
            .filter_map(|(entry, keep)| keep.then_some(entry))
            .collect())
    }

    /// Lists foreign keys in other tables that reference `table`.
    pub fn referencing_foreign_keys(&self, table: &str) -> Result<Vec<InboundForeignKey>> {
        let mut inbound = Vec::new();
        let children: Vec<String> = self
            .entries()?
            .into_iter()
            .filter(|e| e.kind == ObjectKind::Table && !names_match(&e.name, table))
            .map(|e| e.name)
            .collect();

        let mut stmt = self.conn.prepare(
            r#"SELECT id, "from", "to" FROM pragma_foreign_key_list(?1)
               WHERE "table" = ?2 COLLATE NOCASE
               ORDER BY id, seq"#,
        )?;
        for child in children {
            let rows = stmt
                .query_map(params![child, table], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut current: Option<(i64, InboundForeignKey, bool)> = None;
            for (id, from, to) in rows {
                if current.as_ref().is_some_and(|(cur, _, _)| *cur != id) {
                    if let Some((_, fk, implicit)) = current.take() {
                        inbound.push(self.resolve_parent_columns(fk, implicit, table)?);
                    }
                }
                let (_, fk, implicit) = current.get_or_insert_with(|| {
                    (
                        id,
                        InboundForeignKey {
                            table: child.clone(),
                            columns: Vec::new(),
                            parent_columns: Vec::new(),
                        },
                        false,
                    )
                });
                fk.columns.push(from);
                match to {
                    Some(to) => fk.parent_columns.push(to),
                    None => *implicit = true,
                }
            }
            if let Some((_, fk, implicit)) = current {
                inbound.push(self.resolve_parent_columns(fk, implicit, table)?);
            }
        }
        Ok(inbound)
    }

    /// Returns `true` if `table` has a foreign key to itself.
    pub fn references_itself(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                r#"SELECT 1 FROM pragma_foreign_key_list(?1) WHERE "table" = ?1 COLLATE NOCASE LIMIT 1"#,
                params![table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fills in the parent's primary key for `REFERENCES parent` without a
    /// column list.
    fn resolve_parent_columns(
        &self,
        mut fk: InboundForeignKey,
        implicit: bool,
        parent: &str,
    ) -> Result<InboundForeignKey> {
        if implicit {
            let mut stmt = self
                .conn
                .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
            fk.parent_columns = stmt
                .query_map(params![parent], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }
        Ok(fk)
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn read_definition(&self, name: &str, sql: Option<&str>) -> Result<TableDefinition> {
        let scan = sql.and_then(scan_create_table).unwrap_or_default();
        let mut def = TableDefinition::new(name);
        def.without_rowid = scan.without_rowid;
        def.strict = scan.strict;
        def.explicit_primary_key = scan.primary_key_clause;
        def.checks = scan.checks.clone();

        let mut stmt = self.conn.prepare(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#,
        )?;
        def.columns = stmt
            .query_map(params![name], |row| {
                let mut column = ColumnSpec::new(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?);
                column.not_null = row.get::<_, i64>(2)? != 0;
                column.default_value = row.get(3)?;
                column.primary_key = u32::try_from(row.get::<_, i64>(4)?).ok().filter(|p| *p > 0);
                Ok(column)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for column in &mut def.columns {
            if let Some(clause) = scan.column(&column.name) {
                column.autoincrement = clause.autoincrement;
                column.check = clause.check();
                column.collation = clause.collation.clone();
            }
        }

        self.read_unique_constraints(&mut def)?;
        self.read_foreign_keys(&mut def, &scan)?;
        Ok(def)
    }

    /// The pragma lists the most recently created index first.
    fn read_unique_constraints(&self, def: &mut TableDefinition) -> Result<()> {
        let mut list = self
            .conn
            .prepare("SELECT name FROM pragma_index_list(?1) WHERE origin = 'u' ORDER BY seq DESC")?;
        let indices = list
            .query_map(params![def.name], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut info = self
            .conn
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        for index in indices {
            let columns: Vec<String> = info
                .query_map(params![index], |row| row.get::<_, Option<String>>(0))?
                .filter_map(|name| name.transpose())
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let single = match columns.as_slice() {
                [only] => def.columns.iter_mut().find(|c| names_match(&c.name, only)),
                _ => None,
            };
            match single {
                Some(column) => column.unique = true,
                None => def.unique_constraints.push(columns),
            }
        }
        Ok(())
    }

    /// Deferral clauses are not reported by the pragma and come from `scan`.
    fn read_foreign_keys(&self, def: &mut TableDefinition, scan: &TableScan) -> Result<()> {
        // The pragma numbers foreign keys from the last declared one.
        let mut stmt = self.conn.prepare(
            r#"SELECT id, "table", "from", "to", on_update, on_delete, "match"
               FROM pragma_foreign_key_list(?1) ORDER BY id DESC, seq"#,
        )?;
        let rows = stmt
            .query_map(params![def.name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups: Vec<(i64, TableForeignKey, bool)> = Vec::new();
        for (id, parent, from, to, on_update, on_delete, match_name) in rows {
            if groups.last().is_none_or(|(last, _, _)| *last != id) {
                let mut reference = ForeignKeyRef::new(&parent);
                reference.on_update = referential_action(on_update);
                reference.on_delete = referential_action(on_delete);
                reference.match_name = (match_name != "NONE").then_some(match_name);
                groups.push((
                    id,
                    TableForeignKey {
                        columns: Vec::new(),
                        reference,
                    },
                    false,
                ));
            }
            if let Some((_, fk, implicit)) = groups.last_mut() {
                fk.columns.push(from);
                match to {
                    Some(to) => fk.reference.columns.push(to),
                    None => *implicit = true,
                }
            }
        }

        for (_, mut fk, implicit) in groups {
            if implicit {
                fk.reference.columns.clear();
            }
            fk.reference.deferrable = scan.deferral(&fk.columns).map(str::to_string);
            let single = match fk.columns.as_slice() {
                [only] => def
                    .columns
                    .iter_mut()
                    .find(|c| names_match(&c.name, only) && c.foreign_key.is_none()),
                _ => None,
            };
            match single {
                Some(column) => column.foreign_key = Some(fk.reference),
                None => def.foreign_keys.push(fk),
            }
        }
        Ok(())
    }
}

fn referential_action(action: String) -> Option<String> {
    (action != "NO ACTION").then_some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL COLLATE NOCASE CHECK (length(name) > 0),
                email TEXT UNIQUE,
                country TEXT DEFAULT 'FI',
                UNIQUE (name, country)
            );
            CREATE TABLE books (
                id INTEGER PRIMARY KEY,
                author_id INTEGER REFERENCES authors(id) ON DELETE CASCADE,
                title TEXT
            );
            CREATE INDEX idx_authors_name ON authors(name);
            CREATE VIEW v_authors AS SELECT id, name FROM authors;
            CREATE TRIGGER trg_books AFTER INSERT ON books BEGIN
                UPDATE authors SET country = country WHERE id = NEW.author_id;
            END;
            CREATE TRIGGER trg_view INSTEAD OF DELETE ON v_authors BEGIN
                SELECT 1;
            END;
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_read_table_columns() {
        let conn = conn();
        let catalog = SchemaCatalog::new(&conn);
        let entry = catalog.read_table("AUTHORS").unwrap();
        assert_eq!(entry.name, "authors");
        let def = entry.table.unwrap();

        assert_eq!(def.column_names(), vec!["id", "name", "email", "country"]);
        let id = def.column("id").unwrap();
        assert_eq!(id.primary_key, Some(1));
        assert!(id.autoincrement);

        let name = def.column("name").unwrap();
        assert!(name.not_null);
        assert_eq!(name.collation.as_deref(), Some("NOCASE"));
        assert_eq!(name.check.as_deref(), Some("length(name) > 0"));

        assert!(def.column("email").unwrap().unique);
        assert_eq!(def.column("country").unwrap().default_value.as_deref(), Some("'FI'"));
        assert_eq!(def.unique_constraints, vec![vec!["name".to_string(), "country".to_string()]]);
    }

    #[test]
    fn test_read_table_foreign_key() {
        let conn = conn();
        let catalog = SchemaCatalog::new(&conn);
        let def = catalog.read_table("books").unwrap().table.unwrap();
        let fk = def.column("author_id").unwrap().foreign_key.clone().unwrap();
        assert_eq!(fk.table, "authors");
        assert_eq!(fk.columns, vec!["id".to_string()]);
        assert_eq!(fk.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(fk.on_update, None);
    }

    #[test]
    fn test_read_missing_table() {
        let conn = conn();
        let catalog = SchemaCatalog::new(&conn);
        assert!(matches!(catalog.read_table("nope"), Err(RebuildError::TableNotFound(_))));
        assert!(matches!(catalog.read_table("v_authors"), Err(RebuildError::TableNotFound(_))));
    }

    #[test]
    fn test_read_dependents() {
        let conn = conn();
        let catalog = SchemaCatalog::new(&conn);
        let names: Vec<String> = catalog
            .read_dependents("authors")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["idx_authors_name", "v_authors", "trg_books", "trg_view"]);
    }

    #[test]
    fn test_objects_skip_internal_tables() {
        let conn = conn();
        conn.execute("INSERT INTO authors(name) VALUES ('a')", []).unwrap();
        let catalog = SchemaCatalog::new(&conn);
        let objects = catalog.objects().unwrap();
        assert!(objects.iter().all(|o| !o.name.starts_with("sqlite_")));
        let books = objects.iter().find(|o| o.name == "books").unwrap();
        assert_eq!(books.table.as_ref().unwrap().columns.len(), 3);
        assert!(catalog.object_exists("V_AUTHORS").unwrap());
        assert!(!catalog.object_exists("missing").unwrap());
    }

    #[test]
    fn test_referencing_foreign_keys() {
        let conn = conn();
        let catalog = SchemaCatalog::new(&conn);
        let inbound = catalog.referencing_foreign_keys("authors").unwrap();
        assert_eq!(
            inbound,
            vec![InboundForeignKey {
                table: "books".into(),
                columns: vec!["author_id".into()],
                parent_columns: vec!["id".into()],
            }]
        );
        assert!(catalog.referencing_foreign_keys("books").unwrap().is_empty());
    }

    #[test]
    fn test_implicit_parent_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE p (code TEXT PRIMARY KEY);
             CREATE TABLE c (p_code TEXT REFERENCES p);",
        )
        .unwrap();
        let catalog = SchemaCatalog::new(&conn);
        let inbound = catalog.referencing_foreign_keys("p").unwrap();
        assert_eq!(inbound[0].parent_columns, vec!["code".to_string()]);
    }

    #[test]
    fn test_rowid_alias_skips_shadowed_names() {
        let def = TableDefinition::new("t").with_column(ColumnSpec::new("rowid", "TEXT"));
        assert_eq!(rowid_alias(&def), Some("_rowid_"));
        let mut without = TableDefinition::new("t");
        without.without_rowid = true;
        assert_eq!(rowid_alias(&without), None);
    }

    #[test]
    fn test_row_count() {
        let conn = conn();
        conn.execute("INSERT INTO authors(name) VALUES ('a'), ('b')", []).unwrap();
        assert_eq!(SchemaCatalog::new(&conn).row_count("authors").unwrap(), 2);
    }

    #[test]
    fn test_self_reference() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE node (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES Node(id));
             CREATE TABLE leaf (node_id INTEGER REFERENCES node(id));",
        )
        .unwrap();
        let catalog = SchemaCatalog::new(&conn);
        assert!(catalog.references_itself("node").unwrap());
        assert!(!catalog.references_itself("leaf").unwrap());
        // Self-references are not inbound keys from other tables.
        let inbound = catalog.referencing_foreign_keys("node").unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].table, "leaf");
    }

    #[test]
    fn test_unique_sets_keep_declaration_order() {
        let conn = Connection::open_in_memory().unwrap();
        let columns: Vec<String> = (0..12).map(|i| format!("c{i}")).collect();
        let sets: Vec<String> = (0..11).map(|i| format!("UNIQUE (c{i}, c{})", i + 1)).collect();
        conn.execute_batch(&format!(
            "CREATE TABLE wide ({}, {});",
            columns.iter().map(|c| format!("{c} INTEGER")).collect::<Vec<_>>().join(", "),
            sets.join(", ")
        ))
        .unwrap();

        let def = SchemaCatalog::new(&conn).read_table("wide").unwrap().table.unwrap();
        let expected: Vec<Vec<String>> = (0..11).map(|i| vec![format!("c{i}"), format!("c{}", i + 1)]).collect();
        assert_eq!(def.unique_constraints, expected);
    }
}
