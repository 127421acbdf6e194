//! Core table-structure types.
//!
//! These types describe what the engine reads from the catalog
//! ([`CatalogEntry`], [`TableDefinition`], [`ColumnSpec`]) and what a caller
//! asks the engine to turn a table into ([`ProposedTable`]). All of them are
//! plain values: they are re-read from the database for every operation and
//! never cached across structural changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rewrite::RenameSet;

/// Returns `true` if two SQL identifiers name the same object.
///
/// SQLite compares identifiers case-insensitively for ASCII letters.
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Kind of a schema object stored in `sqlite_master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    Index,
    View,
    Trigger,
}

impl ObjectKind {
    /// Returns the catalog spelling (`"table"`, `"index"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Index => "index",
            Self::View => "view",
            Self::Trigger => "trigger",
        }
    }

    /// Parses the `type` column of `sqlite_master`.
    pub fn from_catalog(kind: &str) -> Option<Self> {
        match kind {
            "table" => Some(Self::Table),
            "index" => Some(Self::Index),
            "view" => Some(Self::View),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }

    /// Position of this kind in the dependent restore order:
    /// indices, then views, then triggers.
    pub fn restore_rank(self) -> u8 {
        match self {
            Self::Index => 0,
            Self::View => 1,
            Self::Trigger => 2,
            Self::Table => 3,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a `REFERENCES` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Parent table name.
    pub table: String,
    /// Parent columns. Empty means the parent's primary key.
    #[serde(default)]
    pub columns: Vec<String>,
    /// `ON UPDATE` action, `None` for the default (`NO ACTION`).
    #[serde(default)]
    pub on_update: Option<String>,
    /// `ON DELETE` action, `None` for the default (`NO ACTION`).
    #[serde(default)]
    pub on_delete: Option<String>,
    /// `MATCH` name, `None` for the default (`NONE`).
    #[serde(default)]
    pub match_name: Option<String>,
    /// `[NOT] DEFERRABLE [INITIALLY ...]` clause text.
    #[serde(default)]
    pub deferrable: Option<String>,
}

impl ForeignKeyRef {
    /// Creates a reference to the primary key of `table`.
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            on_update: None,
            on_delete: None,
            match_name: None,
            deferrable: None,
        }
    }

    /// Sets the referenced parent column.
    pub fn to_column(mut self, column: &str) -> Self {
        self.columns = vec![column.to_string()];
        self
    }

    /// Sets the `ON DELETE` action (e.g. `"CASCADE"`).
    pub fn on_delete(mut self, action: &str) -> Self {
        self.on_delete = Some(action.to_string());
        self
    }

    /// Sets the deferral clause (e.g. `"DEFERRABLE INITIALLY DEFERRED"`).
    pub fn deferrable(mut self, clause: &str) -> Self {
        self.deferrable = Some(clause.to_string());
        self
    }
}

/// One column of a table, as read from the catalog or as proposed.
///
/// # Examples
///
/// ```
/// use schema_rebuild_core::ColumnSpec;
///
/// let id = ColumnSpec::new("id", "INTEGER").primary_key().autoincrement();
/// assert!(id.is_integer_primary_key_type());
/// assert_eq!(id.primary_key, Some(1));
///
/// let name = ColumnSpec::new("name", "TEXT").not_null().with_default("'n/a'");
/// assert!(name.not_null);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Declared type exactly as written (`VARCHAR(255)`, `INTEGER`, or empty).
    pub declared_type: String,
    pub not_null: bool,
    /// Default expression text as reported by the engine.
    #[serde(default)]
    pub default_value: Option<String>,
    /// 1-based position inside the primary key, `None` if not part of it.
    #[serde(default)]
    pub primary_key: Option<u32>,
    #[serde(default)]
    pub autoincrement: bool,
    /// Single-column UNIQUE constraint.
    #[serde(default)]
    pub unique: bool,
    /// Column CHECK expression without the surrounding parentheses.
    #[serde(default)]
    pub check: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
    /// Single-column foreign key.
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyRef>,
}

impl ColumnSpec {
    /// Creates a nullable column with no constraints.
    pub fn new(name: &str, declared_type: &str) -> Self {
        Self {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            not_null: false,
            default_value: None,
            primary_key: None,
            autoincrement: false,
            unique: false,
            check: None,
            collation: None,
            foreign_key: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, expr: &str) -> Self {
        self.default_value = Some(expr.to_string());
        self
    }

    /// Marks the column as the first (or only) primary-key column.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = Some(1);
        self
    }

    /// Marks the column as primary-key column number `position` (1-based).
    pub fn primary_key_at(mut self, position: u32) -> Self {
        self.primary_key = Some(position);
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_check(mut self, expr: &str) -> Self {
        self.check = Some(expr.to_string());
        self
    }

    pub fn references(mut self, reference: ForeignKeyRef) -> Self {
        self.foreign_key = Some(reference);
        self
    }

    /// Returns `true` if the declared type gives the column INTEGER affinity
    /// (the type name contains `INT`).
    pub fn has_integer_affinity(&self) -> bool {
        self.declared_type.to_ascii_uppercase().contains("INT")
    }

    /// Returns `true` if the declared type is exactly `INTEGER`, the only
    /// spelling that turns a sole primary-key column into a rowid alias.
    pub fn is_integer_primary_key_type(&self) -> bool {
        self.declared_type.trim().eq_ignore_ascii_case("INTEGER")
    }
}

/// A multi-column `FOREIGN KEY (...) REFERENCES ...` table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableForeignKey {
    pub columns: Vec<String>,
    pub reference: ForeignKeyRef,
}

/// Structure of a table.
///
/// Single-column UNIQUE and FOREIGN KEY constraints live on the column;
/// multi-column ones are kept at table level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub without_rowid: bool,
    #[serde(default)]
    pub strict: bool,
    /// Render the primary key as a separate `PRIMARY KEY(...)` clause.
    #[serde(default)]
    pub explicit_primary_key: bool,
    #[serde(default)]
    pub unique_constraints: Vec<Vec<String>>,
    #[serde(default)]
    pub foreign_keys: Vec<TableForeignKey>,
    /// Table-level CHECK expressions.
    #[serde(default)]
    pub checks: Vec<String>,
}

impl TableDefinition {
    /// Creates an empty rowid table definition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            without_rowid: false,
            strict: false,
            explicit_primary_key: false,
            unique_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Appends a column (builder style).
    pub fn with_column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| names_match(&c.name, name))
    }

    /// Returns the primary-key columns ordered by key position.
    pub fn primary_key_columns(&self) -> Vec<&ColumnSpec> {
        let mut pk: Vec<&ColumnSpec> = self
            .columns
            .iter()
            .filter(|c| c.primary_key.is_some())
            .collect();
        pk.sort_by_key(|c| c.primary_key);
        pk
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// One object from the schema catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub kind: ObjectKind,
    pub name: String,
    /// Table the object belongs to (`tbl_name`); equals `name` for tables and views.
    pub table_name: String,
    /// Original definition text. `None` for objects the engine created itself
    /// (automatic indices).
    pub sql: Option<String>,
    /// Column structure, only present for tables.
    #[serde(default)]
    pub table: Option<TableDefinition>,
}

/// A column of a [`ProposedTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedColumn {
    /// Name of the current column whose data fills this column, or `None`
    /// for a newly added column.
    pub source: Option<String>,
    pub spec: ColumnSpec,
}

/// Target shape of a table for a rebuild.
///
/// Built by the caller from the current definition plus user edits and
/// consumed once by the rebuild. The `source` of each column carries the
/// old-to-new column mapping, so renames, drops and moves are all just
/// edits of this value.
///
/// # Examples
///
/// ```
/// use schema_rebuild_core::*;
///
/// let current = TableDefinition::new("people")
///     .with_column(ColumnSpec::new("id", "INTEGER").primary_key())
///     .with_column(ColumnSpec::new("name", "TEXT"))
///     .with_column(ColumnSpec::new("age", "INTEGER"));
///
/// let mut proposed = ProposedTable::from_current(&current);
/// assert!(proposed.rename_column("name", "full_name"));
/// assert!(proposed.drop_column("age"));
///
/// assert_eq!(
///     proposed.column_mapping(),
///     vec![
///         ("id".to_string(), "id".to_string()),
///         ("name".to_string(), "full_name".to_string()),
///     ]
/// );
/// assert_eq!(proposed.dropped_columns(&current), vec!["age".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTable {
    pub name: String,
    pub columns: Vec<ProposedColumn>,
    #[serde(default)]
    pub without_rowid: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub explicit_primary_key: bool,
    #[serde(default)]
    pub unique_constraints: Vec<Vec<String>>,
    #[serde(default)]
    pub foreign_keys: Vec<TableForeignKey>,
    #[serde(default)]
    pub checks: Vec<String>,
}

impl ProposedTable {
    /// Starts from the current definition: every column maps to itself.
    pub fn from_current(current: &TableDefinition) -> Self {
        Self {
            name: current.name.clone(),
            columns: current
                .columns
                .iter()
                .map(|c| ProposedColumn {
                    source: Some(c.name.clone()),
                    spec: c.clone(),
                })
                .collect(),
            without_rowid: current.without_rowid,
            strict: current.strict,
            explicit_primary_key: current.explicit_primary_key,
            unique_constraints: current.unique_constraints.clone(),
            foreign_keys: current.foreign_keys.clone(),
            checks: current.checks.clone(),
        }
    }

    /// Looks up a column by its *target* name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| names_match(&c.spec.name, name))
            .map(|c| &c.spec)
    }

    /// Mutable lookup by target name, for constraint edits.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.columns
            .iter_mut()
            .find(|c| names_match(&c.spec.name, name))
            .map(|c| &mut c.spec)
    }

    /// Looks up the proposed column filled from current column `source`.
    pub fn column_from_source(&self, source: &str) -> Option<&ProposedColumn> {
        self.columns.iter().find(|c| {
            c.source
                .as_deref()
                .is_some_and(|s| names_match(s, source))
        })
    }

    /// Appends a new column that starts out with its default value (or NULL).
    pub fn add_column(&mut self, spec: ColumnSpec) {
        self.columns.push(ProposedColumn { source: None, spec });
    }

    /// Changes the target table name. Self-referencing foreign keys follow.
    pub fn rename_table(&mut self, new_name: &str) {
        let old = std::mem::replace(&mut self.name, new_name.to_string());
        let references = self
            .columns
            .iter_mut()
            .filter_map(|c| c.spec.foreign_key.as_mut())
            .chain(self.foreign_keys.iter_mut().map(|fk| &mut fk.reference));
        for reference in references {
            if names_match(&reference.table, &old) {
                reference.table = new_name.to_string();
            }
        }
    }

    /// Renames the column currently called `old`.
    ///
    /// Table-level constraint lists, self-referencing foreign keys and CHECK
    /// expressions are updated to the new name. Returns `false` if no column
    /// is called `old`.
    pub fn rename_column(&mut self, old: &str, new: &str) -> bool {
        let Some(column) = self.column_mut(old) else {
            return false;
        };
        let old = column.name.clone();
        column.name = new.to_string();

        let renames = RenameSet::new(&self.name, &self.name).with_column(&old, new);
        let table = self.name.clone();
        let rename_in = |list: &mut Vec<String>| {
            for name in list.iter_mut() {
                if names_match(name, &old) {
                    *name = new.to_string();
                }
            }
        };

        for set in &mut self.unique_constraints {
            rename_in(set);
        }
        for fk in &mut self.foreign_keys {
            rename_in(&mut fk.columns);
            if names_match(&fk.reference.table, &table) {
                rename_in(&mut fk.reference.columns);
            }
        }
        for check in &mut self.checks {
            *check = renames.rewrite(check);
        }
        for proposed in &mut self.columns {
            if let Some(check) = proposed.spec.check.as_mut() {
                *check = renames.rewrite(check);
            }
            if let Some(fk) = proposed.spec.foreign_key.as_mut() {
                if names_match(&fk.table, &table) {
                    rename_in(&mut fk.columns);
                }
            }
        }
        true
    }

    /// Removes the column currently called `name`, together with any
    /// multi-column UNIQUE or FOREIGN KEY constraint that includes it.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(index) = self
            .columns
            .iter()
            .position(|c| names_match(&c.spec.name, name))
        else {
            return false;
        };
        self.columns.remove(index);
        self.unique_constraints
            .retain(|set| !set.iter().any(|c| names_match(c, name)));
        self.foreign_keys
            .retain(|fk| !fk.columns.iter().any(|c| names_match(c, name)));
        true
    }

    /// Moves the column called `name` by `offset` positions (negative moves
    /// it towards the front). Returns `false` if the column does not exist
    /// or the target position is out of range.
    pub fn move_column(&mut self, name: &str, offset: isize) -> bool {
        let Some(index) = self
            .columns
            .iter()
            .position(|c| names_match(&c.spec.name, name))
        else {
            return false;
        };
        let Some(target) = index.checked_add_signed(offset) else {
            return false;
        };
        if target >= self.columns.len() {
            return false;
        }
        let column = self.columns.remove(index);
        self.columns.insert(target, column);
        true
    }

    /// Returns `(source, target)` pairs for every column that keeps data,
    /// in target column order.
    pub fn column_mapping(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .filter_map(|c| {
                c.source
                    .as_ref()
                    .map(|source| (source.clone(), c.spec.name.clone()))
            })
            .collect()
    }

    /// Returns the current columns that no proposed column takes data from.
    pub fn dropped_columns(&self, current: &TableDefinition) -> Vec<String> {
        current
            .columns
            .iter()
            .filter(|c| self.column_from_source(&c.name).is_none())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Builds the rename set dependents must follow after the rebuild.
    pub fn renames(&self, current: &TableDefinition) -> RenameSet {
        let mut renames = RenameSet::new(&current.name, &self.name);
        for (source, target) in self.column_mapping() {
            if source != target {
                renames = renames.with_column(&source, &target);
            }
        }
        for dropped in self.dropped_columns(current) {
            renames = renames.with_dropped(&dropped);
        }
        renames
    }

    /// Returns the proposed structure as a plain table definition.
    pub fn to_definition(&self) -> TableDefinition {
        TableDefinition {
            name: self.name.clone(),
            columns: self.columns.iter().map(|c| c.spec.clone()).collect(),
            without_rowid: self.without_rowid,
            strict: self.strict,
            explicit_primary_key: self.explicit_primary_key,
            unique_constraints: self.unique_constraints.clone(),
            foreign_keys: self.foreign_keys.clone(),
            checks: self.checks.clone(),
        }
    }
}

/// Constraint a [`ValidationVerdict`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    NotNull,
    /// Existing values must all be integers before AUTOINCREMENT is enabled.
    Autoincrement,
    Unique,
    /// The new primary-key column set must not contain duplicates.
    PrimaryKey,
    WithoutRowid,
    /// A column referenced by another table's foreign key is being renamed
    /// or dropped.
    ForeignKeyLock,
}

impl ConstraintKind {
    /// Structural kinds are decided without looking at row data.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::WithoutRowid | Self::ForeignKeyLock)
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotNull => "NOT NULL",
            Self::Autoincrement => "AUTOINCREMENT",
            Self::Unique => "UNIQUE",
            Self::PrimaryKey => "PRIMARY KEY",
            Self::WithoutRowid => "WITHOUT ROWID",
            Self::ForeignKeyLock => "FOREIGN KEY",
        };
        f.write_str(name)
    }
}

/// Result of one constraint check against current data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub kind: ConstraintKind,
    /// Column the check applies to; `None` for table-level checks.
    pub column: Option<String>,
    pub satisfied: bool,
    /// Offending-row description when not satisfied.
    pub detail: Option<String>,
}

impl ValidationVerdict {
    pub fn satisfied(kind: ConstraintKind, column: Option<&str>) -> Self {
        Self {
            kind,
            column: column.map(String::from),
            satisfied: true,
            detail: None,
        }
    }

    pub fn violated(kind: ConstraintKind, column: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            column: column.map(String::from),
            satisfied: false,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ValidationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.satisfied { "ok" } else { "violated" };
        match &self.column {
            Some(column) => write!(f, "{} on \"{}\": {}", self.kind, column, status)?,
            None => write!(f, "{}: {}", self.kind, status)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}
