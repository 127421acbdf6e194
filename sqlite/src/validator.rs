//! Data checks for proposed table changes.
//!
//! Each check is a read-only query against the *current* table and returns
//! a [`ValidationVerdict`]. [`validate_change`] decides which checks a
//! proposed definition needs (only constraints the proposal adds are
//! checked) and returns their verdicts in proposed column order, followed by
//! table-level verdicts.
//!
//! Offending rows are named by rowid, or by primary key for WITHOUT ROWID
//! tables.

use rusqlite::{Connection, OptionalExtension};
use schema_rebuild_core::{
    ConstraintKind, ProposedTable, TableDefinition, ValidationVerdict, names_match, quote_identifier,
    quote_list,
};

use crate::catalog::{SchemaCatalog, rowid_alias};
use crate::error::{RebuildError, Result};

/// How a row of the current table is identified in verdict details.
struct RowLocator {
    /// SQL expression producing a printable row identifier.
    expr: String,
    label: String,
}

impl RowLocator {
    fn for_table(def: &TableDefinition) -> Self {
        if let Some(alias) = rowid_alias(def) {
            return Self {
                expr: alias.to_string(),
                label: "rowid".to_string(),
            };
        }
        let pk = def.primary_key_columns();
        if pk.is_empty() {
            // Every alias is shadowed and there is no key to fall back on.
            return Self {
                expr: "NULL".to_string(),
                label: "row".to_string(),
            };
        }
        let names: Vec<&str> = pk.iter().map(|c| c.name.as_str()).collect();
        let expr = names
            .iter()
            .map(|n| format!("quote({})", quote_identifier(n)))
            .collect::<Vec<_>>()
            .join(" || ', ' || ");
        Self {
            expr,
            label: format!("row with ({})", names.join(", ")),
        }
    }

    fn describe(&self, value: Option<String>) -> String {
        match value {
            Some(value) => format!("{} {}", self.label, value),
            None => self.label.clone(),
        }
    }
}

fn first_row(conn: &Connection, sql: &str) -> Result<Option<(Option<String>, Option<String>)>> {
    let row = conn
        .query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    Ok(row)
}

/// Fails if `column` holds any NULL.
pub fn check_not_null(conn: &Connection, def: &TableDefinition, column: &str) -> Result<ValidationVerdict> {
    let locator = RowLocator::for_table(def);
    let table = quote_identifier(&def.name);
    let col = quote_identifier(column);
    let nulls: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {col} IS NULL"),
        [],
        |row| row.get(0),
    )?;
    if nulls == 0 {
        return Ok(ValidationVerdict::satisfied(ConstraintKind::NotNull, Some(column)));
    }
    let first: Option<String> = conn
        .query_row(
            &format!("SELECT CAST({} AS TEXT) FROM {table} WHERE {col} IS NULL LIMIT 1", locator.expr),
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(ValidationVerdict::violated(
        ConstraintKind::NotNull,
        Some(column),
        format!("{nulls} row(s) are NULL, first at {}", locator.describe(first)),
    ))
}

/// Fails if `column` holds a value that is neither an integer nor NULL.
pub fn check_autoincrement_integers(
    conn: &Connection,
    def: &TableDefinition,
    column: &str,
) -> Result<ValidationVerdict> {
    let locator = RowLocator::for_table(def);
    let col = quote_identifier(column);
    let sql = format!(
        "SELECT CAST({} AS TEXT), quote({col}) FROM {} WHERE typeof({col}) NOT IN ('integer', 'null') LIMIT 1",
        locator.expr,
        quote_identifier(&def.name)
    );
    Ok(match first_row(conn, &sql)? {
        None => ValidationVerdict::satisfied(ConstraintKind::Autoincrement, Some(column)),
        Some((row, value)) => ValidationVerdict::violated(
            ConstraintKind::Autoincrement,
            Some(column),
            format!(
                "{} holds non-integer value {}",
                locator.describe(row),
                value.unwrap_or_default()
            ),
        ),
    })
}

fn duplicate_check(
    conn: &Connection,
    def: &TableDefinition,
    columns: &[String],
    kind: ConstraintKind,
) -> Result<ValidationVerdict> {
    let label = columns.join(", ");
    let quoted = quote_list(columns);
    let value_expr = columns
        .iter()
        .map(|c| format!("quote({})", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" || ', ' || ");
    let not_null = columns
        .iter()
        .map(|c| format!("{} IS NOT NULL", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT {value_expr}, CAST(COUNT(*) AS TEXT) FROM {} WHERE {not_null} GROUP BY {quoted} HAVING COUNT(*) > 1 LIMIT 1",
        quote_identifier(&def.name)
    );
    Ok(match first_row(conn, &sql)? {
        None => ValidationVerdict::satisfied(kind, Some(&label)),
        Some((value, count)) => ValidationVerdict::violated(
            kind,
            Some(&label),
            format!(
                "value {} appears {} times",
                value.unwrap_or_default(),
                count.unwrap_or_default()
            ),
        ),
    })
}

/// Fails if the column set holds a duplicated non-NULL value.
pub fn check_unique(conn: &Connection, def: &TableDefinition, columns: &[String]) -> Result<ValidationVerdict> {
    duplicate_check(conn, def, columns, ConstraintKind::Unique)
}

/// Fails if the proposed primary-key column set holds duplicates.
pub fn check_primary_key_unique(
    conn: &Connection,
    def: &TableDefinition,
    columns: &[String],
) -> Result<ValidationVerdict> {
    duplicate_check(conn, def, columns, ConstraintKind::PrimaryKey)
}

/// Checks the shape a table needs before WITHOUT ROWID can be enabled:
/// exactly one primary-key column of integer type, without AUTOINCREMENT.
pub fn check_without_rowid(proposed: &ProposedTable) -> ValidationVerdict {
    let def = proposed.to_definition();
    let pk = def.primary_key_columns();
    let problem = match pk.as_slice() {
        [] => Some("table has no primary key".to_string()),
        [column] if !column.has_integer_affinity() => {
            Some(format!("primary key column \"{}\" is not an integer column", column.name))
        }
        [column] if column.autoincrement => {
            Some(format!("primary key column \"{}\" uses AUTOINCREMENT", column.name))
        }
        [_] => None,
        more => Some(format!("primary key spans {} columns", more.len())),
    };
    match problem {
        None => ValidationVerdict::satisfied(ConstraintKind::WithoutRowid, None),
        Some(detail) => ValidationVerdict::violated(ConstraintKind::WithoutRowid, None, detail),
    }
}

/// Rejects renaming or dropping a column another table's foreign key points
/// at, and renaming a referenced table. Returns one verdict per violation.
pub fn check_foreign_key_lock(
    conn: &Connection,
    current: &TableDefinition,
    proposed: &ProposedTable,
) -> Result<Vec<ValidationVerdict>> {
    let inbound = SchemaCatalog::new(conn).referencing_foreign_keys(&current.name)?;
    let mut verdicts = Vec::new();
    if inbound.is_empty() {
        return Ok(verdicts);
    }

    if !names_match(&proposed.name, &current.name) {
        let children: Vec<&str> = inbound.iter().map(|fk| fk.table.as_str()).collect();
        verdicts.push(ValidationVerdict::violated(
            ConstraintKind::ForeignKeyLock,
            None,
            format!("table is referenced by {}", children.join(", ")),
        ));
    }

    let mut seen: Vec<&str> = Vec::new();
    for fk in &inbound {
        for parent in &fk.parent_columns {
            if seen.iter().any(|s| names_match(s, parent)) {
                continue;
            }
            seen.push(parent);
            let detail = match proposed.column_from_source(parent) {
                None => Some(format!("referenced by {}, cannot be dropped", fk.table)),
                Some(target) if !names_match(&target.spec.name, parent) => Some(format!(
                    "referenced by {}, cannot be renamed to \"{}\"",
                    fk.table, target.spec.name
                )),
                Some(_) => None,
            };
            if let Some(detail) = detail {
                verdicts.push(ValidationVerdict::violated(
                    ConstraintKind::ForeignKeyLock,
                    Some(parent),
                    detail,
                ));
            }
        }
    }
    Ok(verdicts)
}

/// Runs every check the proposed change needs against current data.
///
/// Only constraints that `proposed` adds relative to `current` are checked.
/// The result is deterministic for an unchanged database.
pub fn validate_change(
    conn: &Connection,
    current: &TableDefinition,
    proposed: &ProposedTable,
) -> Result<Vec<ValidationVerdict>> {
    let mut verdicts = Vec::new();
    let rows = SchemaCatalog::new(conn).row_count(&current.name)?;

    for column in &proposed.columns {
        let spec = &column.spec;
        let key_not_null = proposed.without_rowid && spec.primary_key.is_some();
        let wants_not_null = spec.not_null || key_not_null;

        let Some(old) = column.source.as_deref().and_then(|s| current.column(s)) else {
            // New column: every existing row gets the default.
            if wants_not_null {
                verdicts.push(if spec.default_value.is_none() && rows > 0 {
                    ValidationVerdict::violated(
                        ConstraintKind::NotNull,
                        Some(&spec.name),
                        format!("new column has no default and the table has {rows} row(s)"),
                    )
                } else {
                    ValidationVerdict::satisfied(ConstraintKind::NotNull, Some(&spec.name))
                });
            }
            if spec.unique {
                let shared_default = spec
                    .default_value
                    .as_deref()
                    .is_some_and(|d| !d.eq_ignore_ascii_case("NULL"));
                verdicts.push(if shared_default && rows > 1 {
                    ValidationVerdict::violated(
                        ConstraintKind::Unique,
                        Some(&spec.name),
                        format!("default value would repeat across {rows} rows"),
                    )
                } else {
                    ValidationVerdict::satisfied(ConstraintKind::Unique, Some(&spec.name))
                });
            }
            continue;
        };

        let was_not_null = old.not_null || (current.without_rowid && old.primary_key.is_some());
        if wants_not_null && !was_not_null {
            verdicts.push(check_not_null(conn, current, &old.name)?);
        }
        if spec.autoincrement && !old.autoincrement {
            verdicts.push(check_autoincrement_integers(conn, current, &old.name)?);
        }
        if spec.unique && !old.unique {
            verdicts.push(check_unique(conn, current, std::slice::from_ref(&old.name))?);
        }
    }

    // Table-level UNIQUE sets, compared by source column.
    let current_sets: Vec<Vec<String>> = current
        .unique_constraints
        .iter()
        .map(|set| set.iter().map(|c| c.to_ascii_lowercase()).collect())
        .collect();
    for set in &proposed.unique_constraints {
        let Some(sources) = source_columns(proposed, set) else {
            continue;
        };
        let key: Vec<String> = sources.iter().map(|c| c.to_ascii_lowercase()).collect();
        if !current_sets.contains(&key) {
            verdicts.push(check_unique(conn, current, &sources)?);
        }
    }

    // Primary key.
    let proposed_def = proposed.to_definition();
    let proposed_pk: Vec<String> = proposed_def
        .primary_key_columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    if let Some(sources) = source_columns(proposed, &proposed_pk) {
        let current_pk: Vec<String> = current
            .primary_key_columns()
            .iter()
            .map(|c| c.name.to_ascii_lowercase())
            .collect();
        let key: Vec<String> = sources.iter().map(|c| c.to_ascii_lowercase()).collect();
        if !sources.is_empty() && key != current_pk {
            verdicts.push(check_primary_key_unique(conn, current, &sources)?);
        }
    }

    if proposed.without_rowid && !current.without_rowid {
        verdicts.push(check_without_rowid(proposed));
    }

    verdicts.extend(check_foreign_key_lock(conn, current, proposed)?);
    Ok(verdicts)
}

/// Maps proposed column names to the current columns feeding them. Returns
/// `None` if any of them is a new column.
fn source_columns(proposed: &ProposedTable, targets: &[String]) -> Option<Vec<String>> {
    targets
        .iter()
        .map(|target| {
            proposed
                .columns
                .iter()
                .find(|c| names_match(&c.spec.name, target))
                .and_then(|c| c.source.clone())
        })
        .collect()
}

/// Turns the first unsatisfied verdict into the matching error.
pub fn blocking_error(verdicts: &[ValidationVerdict]) -> Option<RebuildError> {
    let verdict = verdicts.iter().find(|v| !v.satisfied)?;
    Some(if verdict.kind.is_structural() {
        RebuildError::Structural(verdict.to_string())
    } else {
        RebuildError::Validation {
            kind: verdict.kind,
            detail: verdict.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_rebuild_core::ColumnSpec;

    fn setup(sql: &str) -> (Connection, TableDefinition) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(sql).unwrap();
        let def = SchemaCatalog::new(&conn).read_table("t").unwrap().table.unwrap();
        (conn, def)
    }

    #[test]
    fn test_not_null_names_first_row() {
        let (conn, def) = setup(
            "CREATE TABLE t (a TEXT, b TEXT);
             INSERT INTO t VALUES ('x', 'y'), ('z', NULL), ('w', NULL);",
        );
        let verdict = check_not_null(&conn, &def, "b").unwrap();
        assert!(!verdict.satisfied);
        assert_eq!(verdict.detail.as_deref(), Some("2 row(s) are NULL, first at rowid 2"));
        assert!(check_not_null(&conn, &def, "a").unwrap().satisfied);
    }

    #[test]
    fn test_locator_for_without_rowid() {
        let (conn, def) = setup(
            "CREATE TABLE t (code TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID;
             INSERT INTO t VALUES ('k1', NULL);",
        );
        let verdict = check_not_null(&conn, &def, "v").unwrap();
        assert_eq!(verdict.detail.as_deref(), Some("1 row(s) are NULL, first at row with (code) 'k1'"));
    }

    #[test]
    fn test_autoincrement_integer_check() {
        let (conn, def) = setup(
            "CREATE TABLE t (n, label TEXT);
             INSERT INTO t VALUES (1, 'a'), (NULL, 'b'), ('abc', 'c');",
        );
        let verdict = check_autoincrement_integers(&conn, &def, "n").unwrap();
        assert!(!verdict.satisfied);
        assert_eq!(verdict.detail.as_deref(), Some("rowid 3 holds non-integer value 'abc'"));
    }

    #[test]
    fn test_unique_reports_duplicate_value() {
        let (conn, def) = setup(
            "CREATE TABLE t (email TEXT, org TEXT);
             INSERT INTO t VALUES ('a@x', 'o'), ('a@x', 'p'), (NULL, 'o'), (NULL, 'o');",
        );
        let verdict = check_unique(&conn, &def, &["email".to_string()]).unwrap();
        assert_eq!(verdict.detail.as_deref(), Some("value 'a@x' appears 2 times"));

        let pair = check_unique(&conn, &def, &["email".to_string(), "org".to_string()]).unwrap();
        assert!(pair.satisfied);
        assert_eq!(pair.column.as_deref(), Some("email, org"));
    }

    #[test]
    fn test_without_rowid_shape() {
        let (_, def) = setup("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);");
        let mut proposed = ProposedTable::from_current(&def);
        proposed.without_rowid = true;
        assert!(check_without_rowid(&proposed).satisfied);

        proposed.column_mut("id").unwrap().autoincrement = true;
        assert!(!check_without_rowid(&proposed).satisfied);

        let mut text_key = ProposedTable::from_current(&def);
        text_key.without_rowid = true;
        text_key.column_mut("id").unwrap().declared_type = "TEXT".into();
        assert!(!check_without_rowid(&text_key).satisfied);
    }

    #[test]
    fn test_validate_change_only_checks_new_constraints() {
        let (conn, def) = setup(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL, note TEXT);
             INSERT INTO t VALUES (1, 'a', NULL);",
        );
        let proposed = ProposedTable::from_current(&def);
        assert!(validate_change(&conn, &def, &proposed).unwrap().is_empty());

        let mut proposed = ProposedTable::from_current(&def);
        proposed.column_mut("note").unwrap().not_null = true;
        proposed.add_column(ColumnSpec::new("extra", "TEXT").not_null());
        let verdicts = validate_change(&conn, &def, &proposed).unwrap();
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].column.as_deref(), Some("note"));
        assert_eq!(verdicts[1].column.as_deref(), Some("extra"));
        assert!(verdicts.iter().all(|v| !v.satisfied));
        assert!(matches!(
            blocking_error(&verdicts),
            Some(RebuildError::Validation { kind: ConstraintKind::NotNull, .. })
        ));
    }

    #[test]
    fn test_new_primary_key_checked_for_duplicates() {
        let (conn, def) = setup(
            "CREATE TABLE t (a TEXT, b TEXT);
             INSERT INTO t VALUES ('x', '1'), ('x', '2');",
        );
        let mut proposed = ProposedTable::from_current(&def);
        proposed.column_mut("a").unwrap().primary_key = Some(1);
        let verdicts = validate_change(&conn, &def, &proposed).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].kind, ConstraintKind::PrimaryKey);
        assert!(!verdicts[0].satisfied);
    }

    #[test]
    fn test_foreign_key_lock() {
        let (conn, def) = setup(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE child (t_id INTEGER REFERENCES t(id));",
        );
        let mut proposed = ProposedTable::from_current(&def);
        proposed.rename_column("id", "tid");
        let verdicts = check_foreign_key_lock(&conn, &def, &proposed).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].column.as_deref(), Some("id"));
        assert!(matches!(blocking_error(&verdicts), Some(RebuildError::Structural(_))));

        let mut renamed = ProposedTable::from_current(&def);
        renamed.rename_column("name", "label");
        assert!(check_foreign_key_lock(&conn, &def, &renamed).unwrap().is_empty());

        let mut moved = ProposedTable::from_current(&def);
        moved.rename_table("t2");
        assert_eq!(check_foreign_key_lock(&conn, &def, &moved).unwrap().len(), 1);
    }

    #[test]
    fn test_validate_change_is_repeatable() {
        let (conn, def) = setup(
            "CREATE TABLE t (v TEXT);
             INSERT INTO t VALUES ('a'), ('a'), (NULL);",
        );
        let mut proposed = ProposedTable::from_current(&def);
        proposed.column_mut("v").unwrap().unique = true;
        proposed.column_mut("v").unwrap().not_null = true;
        let first = validate_change(&conn, &def, &proposed).unwrap();
        let second = validate_change(&conn, &def, &proposed).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
