//! SQL text generation for table structures.
//!
//! Produces the `CREATE TABLE` statement for a [`TableDefinition`] plus the
//! small DDL helpers the rebuild needs. All identifiers are emitted
//! double-quoted, so any name SQLite accepts round-trips.
//!
//! # Output format
//!
//! ```text
//! CREATE TABLE "t" (
//! 	"id"	INTEGER PRIMARY KEY AUTOINCREMENT,
//! 	"car"	TEXT NOT NULL,
//! 	"km"	INTEGER CHECK(km > 1000),
//! 	UNIQUE("car","km")
//! ) WITHOUT ROWID;
//! ```
//!
//! A sole primary-key column is declared inline; composite keys (and tables
//! that ask for it via `explicit_primary_key`) get a separate
//! `PRIMARY KEY(...)` clause.

use crate::types::{ColumnSpec, ForeignKeyRef, ObjectKind, TableDefinition};

/// Quotes an identifier with double quotes, doubling embedded quotes.
///
/// ```
/// use schema_rebuild_core::quote_identifier;
///
/// assert_eq!(quote_identifier("name"), "\"name\"");
/// assert_eq!(quote_identifier("say \"hi\""), "\"say \"\"hi\"\"\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal with single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Returns `true` if `name` can be written without quotes.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !is_keyword(name)
}

/// Returns `true` if `word` is an SQLite keyword.
pub fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

// Sorted for binary search.
const KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY",
    "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT", "NOTHING",
    "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS", "OUTER", "OVER",
    "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE", "RANGE",
    "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT",
    "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET", "TABLE",
    "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED", "UNION",
    "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN", "WHERE",
    "WINDOW", "WITH", "WITHOUT",
];

/// Joins quoted identifiers with commas: `"a","b"`.
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_identifier(n.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders a default expression for a `DEFAULT` clause.
///
/// Literals are written as-is, anything else is parenthesized.
pub fn render_default(expr: &str) -> String {
    let expr = expr.trim();
    if is_literal(expr) || is_wrapped_in_parens(expr) {
        expr.to_string()
    } else {
        format!("({expr})")
    }
}

fn is_literal(expr: &str) -> bool {
    let upper = expr.to_ascii_uppercase();
    if matches!(
        upper.as_str(),
        "NULL" | "TRUE" | "FALSE" | "CURRENT_TIME" | "CURRENT_DATE" | "CURRENT_TIMESTAMP"
    ) {
        return true;
    }
    if is_single_string(expr) {
        return true;
    }
    if (upper.starts_with("X'")) && is_single_string(&expr[1..]) {
        return true;
    }
    let digits = expr.strip_prefix(['-', '+']).unwrap_or(expr);
    !digits.is_empty()
        && digits.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && digits.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '+' || c == '-')
}

/// Returns `true` if `text` is exactly one `'...'` literal.
fn is_single_string(text: &str) -> bool {
    let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) else {
        return false;
    };
    text.len() >= 2 && inner.replace("''", "").find('\'').is_none()
}

/// Returns `true` if the first `(` is closed by the final character.
fn is_wrapped_in_parens(expr: &str) -> bool {
    if !expr.starts_with('(') || !expr.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, c) in expr.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == expr.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn references_sql(reference: &ForeignKeyRef) -> String {
    let mut sql = format!("REFERENCES {}", quote_identifier(&reference.table));
    if !reference.columns.is_empty() {
        sql.push_str(&format!("({})", quote_list(&reference.columns)));
    }
    if let Some(name) = &reference.match_name {
        sql.push_str(&format!(" MATCH {name}"));
    }
    if let Some(action) = &reference.on_update {
        sql.push_str(&format!(" ON UPDATE {action}"));
    }
    if let Some(action) = &reference.on_delete {
        sql.push_str(&format!(" ON DELETE {action}"));
    }
    if let Some(clause) = &reference.deferrable {
        sql.push(' ');
        sql.push_str(clause);
    }
    sql
}

/// Renders one column definition.
///
/// `inline_primary_key` decides whether a primary-key column carries its
/// `PRIMARY KEY` clause here or in the table-level clause.
pub fn column_sql(column: &ColumnSpec, inline_primary_key: bool) -> String {
    let mut sql = quote_identifier(&column.name);
    if !column.declared_type.is_empty() {
        sql.push('\t');
        sql.push_str(&column.declared_type);
    }
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if inline_primary_key && column.primary_key.is_some() {
        sql.push_str(" PRIMARY KEY");
        if column.autoincrement {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&render_default(default));
    }
    if let Some(check) = &column.check {
        sql.push_str(&format!(" CHECK({check})"));
    }
    if let Some(collation) = &column.collation {
        sql.push_str(&format!(" COLLATE {collation}"));
    }
    if let Some(reference) = &column.foreign_key {
        sql.push(' ');
        sql.push_str(&references_sql(reference));
    }
    sql
}

/// Returns `true` if the primary key of `def` is declared on its column.
pub fn has_inline_primary_key(def: &TableDefinition) -> bool {
    let pk = def.primary_key_columns();
    pk.len() == 1 && (pk[0].autoincrement || !def.explicit_primary_key)
}

/// Renders the full `CREATE TABLE` statement for `def`.
///
/// # Examples
///
/// ```
/// use schema_rebuild_core::{ColumnSpec, TableDefinition, create_table_sql};
///
/// let def = TableDefinition::new("t")
///     .with_column(ColumnSpec::new("id", "INTEGER").primary_key())
///     .with_column(ColumnSpec::new("name", "TEXT").not_null());
/// assert_eq!(
///     create_table_sql(&def),
///     "CREATE TABLE \"t\" (\n\t\"id\"\tINTEGER PRIMARY KEY,\n\t\"name\"\tTEXT NOT NULL\n);"
/// );
/// ```
pub fn create_table_sql(def: &TableDefinition) -> String {
    let inline_pk = has_inline_primary_key(def);
    let mut items: Vec<String> = def.columns.iter().map(|c| column_sql(c, inline_pk)).collect();

    let pk = def.primary_key_columns();
    if !inline_pk && !pk.is_empty() {
        let names: Vec<&str> = pk.iter().map(|c| c.name.as_str()).collect();
        items.push(format!("PRIMARY KEY({})", quote_list(&names)));
    }
    for set in &def.unique_constraints {
        items.push(format!("UNIQUE({})", quote_list(set)));
    }
    for fk in &def.foreign_keys {
        items.push(format!(
            "FOREIGN KEY({}) {}",
            quote_list(&fk.columns),
            references_sql(&fk.reference)
        ));
    }
    for check in &def.checks {
        items.push(format!("CHECK({check})"));
    }

    let mut options = Vec::new();
    if def.without_rowid {
        options.push("WITHOUT ROWID");
    }
    if def.strict {
        options.push("STRICT");
    }
    let options = if options.is_empty() {
        String::new()
    } else {
        format!(" {}", options.join(", "))
    };

    format!(
        "CREATE TABLE {} (\n\t{}\n){};",
        quote_identifier(&def.name),
        items.join(",\n\t"),
        options
    )
}

/// `ALTER TABLE ... ADD COLUMN ...`
pub fn add_column_sql(table: &str, column: &ColumnSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {};",
        quote_identifier(table),
        column_sql(column, true)
    )
}

/// `ALTER TABLE ... RENAME TO ...`
pub fn rename_table_sql(from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {};",
        quote_identifier(from),
        quote_identifier(to)
    )
}

/// `DROP <kind> ...`
pub fn drop_object_sql(kind: ObjectKind, name: &str) -> String {
    format!("DROP {} {};", kind.as_str().to_ascii_uppercase(), quote_identifier(name))
}

impl TableDefinition {
    /// Shorthand for [`create_table_sql`].
    pub fn create_sql(&self) -> String {
        create_table_sql(self)
    }
}
