//! Structural validation of table definitions.
//!
//! Catches definitions that could never be created (no columns, duplicate
//! names, AUTOINCREMENT on a non-rowid-alias column, constraints naming
//! columns that do not exist) before any SQL is executed. Checks that depend
//! on the data already in the table live in the engine crate.
//!
//! # Examples
//!
//! ```
//! use schema_rebuild_core::*;
//!
//! let current = TableDefinition::new("t")
//!     .with_column(ColumnSpec::new("id", "INTEGER").primary_key())
//!     .with_column(ColumnSpec::new("name", "TEXT"));
//! assert!(validate_definition(&current).is_empty());
//!
//! let mut proposed = ProposedTable::from_current(&current);
//! proposed.rename_column("name", "id");
//! let errors = validate_proposed(&proposed, &current);
//! assert!(errors.iter().any(|e| matches!(e, DefinitionError::DuplicateColumn(_))));
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::{ProposedTable, TableDefinition};

/// Definition validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("table must have at least one column")]
    NoColumns,
    #[error("column name cannot be empty")]
    EmptyColumnName,
    /// Two columns share a name (compared case-insensitively).
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),
    /// Two proposed columns take their data from the same current column.
    #[error("current column {0} is used as source more than once")]
    DuplicateSource(String),
    /// A proposed column names a source the current table does not have.
    #[error("unknown source column: {0}")]
    UnknownSource(String),
    /// AUTOINCREMENT is only allowed on a sole `INTEGER PRIMARY KEY` column.
    #[error("AUTOINCREMENT requires a sole INTEGER PRIMARY KEY column: {0}")]
    AutoincrementRequiresIntegerPrimaryKey(String),
    /// A table-level constraint lists a column the table does not have.
    #[error("constraint references unknown column: {0}")]
    UnknownConstraintColumn(String),
    /// Every proposed column is new, so no data would survive.
    #[error("proposed table keeps no existing column")]
    NoRetainedColumns,
}

/// Validates a table definition on its own.
pub fn validate_definition(def: &TableDefinition) -> Vec<DefinitionError> {
    let mut errors = Vec::new();

    if def.name.trim().is_empty() {
        errors.push(DefinitionError::EmptyTableName);
    }
    if def.columns.is_empty() {
        errors.push(DefinitionError::NoColumns);
        return errors;
    }

    let mut seen = HashSet::new();
    for column in &def.columns {
        if column.name.trim().is_empty() {
            errors.push(DefinitionError::EmptyColumnName);
            continue;
        }
        if !seen.insert(column.name.to_ascii_lowercase()) {
            errors.push(DefinitionError::DuplicateColumn(column.name.clone()));
        }
    }

    let pk = def.primary_key_columns();
    for column in def.columns.iter().filter(|c| c.autoincrement) {
        let sole_integer_key =
            pk.len() == 1 && pk[0].name == column.name && column.is_integer_primary_key_type();
        if !sole_integer_key || def.without_rowid {
            errors.push(DefinitionError::AutoincrementRequiresIntegerPrimaryKey(
                column.name.clone(),
            ));
        }
    }

    let constraint_columns = def
        .unique_constraints
        .iter()
        .flatten()
        .chain(def.foreign_keys.iter().flat_map(|fk| fk.columns.iter()));
    for name in constraint_columns {
        if def.column(name).is_none() {
            errors.push(DefinitionError::UnknownConstraintColumn(name.clone()));
        }
    }

    errors
}

/// Validates a proposed table against the table it will replace.
///
/// Runs [`validate_definition`] on the target shape and additionally checks
/// that every column source exists in `current` and is used at most once.
pub fn validate_proposed(proposed: &ProposedTable, current: &TableDefinition) -> Vec<DefinitionError> {
    let mut errors = validate_definition(&proposed.to_definition());

    let mut sources = HashSet::new();
    for source in proposed.columns.iter().filter_map(|c| c.source.as_deref()) {
        if current.column(source).is_none() {
            errors.push(DefinitionError::UnknownSource(source.to_string()));
        } else if !sources.insert(source.to_ascii_lowercase()) {
            errors.push(DefinitionError::DuplicateSource(source.to_string()));
        }
    }

    if !proposed.columns.is_empty() && sources.is_empty() && !current.columns.is_empty() {
        errors.push(DefinitionError::NoRetainedColumns);
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnSpec, ProposedColumn};

    fn table() -> TableDefinition {
        TableDefinition::new("t")
            .with_column(ColumnSpec::new("id", "INTEGER").primary_key())
            .with_column(ColumnSpec::new("name", "TEXT"))
    }

    #[test]
    fn test_valid_definition() {
        assert!(validate_definition(&table()).is_empty());
    }

    #[test]
    fn test_empty_table_rejected() {
        let errors = validate_definition(&TableDefinition::new(""));
        assert_eq!(errors, vec![DefinitionError::EmptyTableName, DefinitionError::NoColumns]);
    }

    #[test]
    fn test_duplicate_column_is_case_insensitive() {
        let def = table().with_column(ColumnSpec::new("NAME", "TEXT"));
        assert_eq!(validate_definition(&def), vec![DefinitionError::DuplicateColumn("NAME".into())]);
    }

    #[test]
    fn test_autoincrement_rules() {
        let ok = TableDefinition::new("t")
            .with_column(ColumnSpec::new("id", "INTEGER").primary_key().autoincrement());
        assert!(validate_definition(&ok).is_empty());

        let bigint = TableDefinition::new("t")
            .with_column(ColumnSpec::new("id", "BIGINT").primary_key().autoincrement());
        assert_eq!(
            validate_definition(&bigint),
            vec![DefinitionError::AutoincrementRequiresIntegerPrimaryKey("id".into())]
        );

        let composite = TableDefinition::new("t")
            .with_column(ColumnSpec::new("id", "INTEGER").primary_key_at(1).autoincrement())
            .with_column(ColumnSpec::new("k", "TEXT").primary_key_at(2));
        assert_eq!(validate_definition(&composite).len(), 1);

        let not_key = TableDefinition::new("t").with_column(ColumnSpec::new("n", "INTEGER").autoincrement());
        assert_eq!(validate_definition(&not_key).len(), 1);
    }

    #[test]
    fn test_unknown_constraint_column() {
        let mut def = table();
        def.unique_constraints.push(vec!["name".into(), "email".into()]);
        assert_eq!(
            validate_definition(&def),
            vec![DefinitionError::UnknownConstraintColumn("email".into())]
        );
    }

    #[test]
    fn test_proposed_sources() {
        let current = table();
        let mut proposed = ProposedTable::from_current(&current);
        proposed.columns.push(ProposedColumn {
            source: Some("name".into()),
            spec: ColumnSpec::new("name_copy", "TEXT"),
        });
        proposed.columns.push(ProposedColumn {
            source: Some("ghost".into()),
            spec: ColumnSpec::new("ghost", "TEXT"),
        });
        let errors = validate_proposed(&proposed, &current);
        assert!(errors.contains(&DefinitionError::DuplicateSource("name".into())));
        assert!(errors.contains(&DefinitionError::UnknownSource("ghost".into())));
    }

    #[test]
    fn test_proposed_without_retained_columns() {
        let current = table();
        let mut proposed = ProposedTable::from_current(&current);
        proposed.columns.clear();
        proposed.add_column(ColumnSpec::new("fresh", "TEXT"));
        assert_eq!(
            validate_proposed(&proposed, &current),
            vec![DefinitionError::NoRetainedColumns]
        );
    }
}
