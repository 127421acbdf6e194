//! Table structures and SQL text handling for SQLite table rebuilds.
//!
//! SQLite's `ALTER TABLE` cannot change most column properties. The usual
//! workaround is to build a new table with the desired shape, copy the rows
//! across, swap the tables and recreate whatever depended on the old one.
//! This crate holds the database-independent half of that:
//!
//! - [`TableDefinition`], [`ColumnSpec`] and [`CatalogEntry`] describe what
//!   the catalog contains.
//! - [`ProposedTable`] describes the target shape, including which current
//!   column feeds each new column.
//! - [`create_table_sql`] renders a definition back to DDL.
//! - [`scan_create_table`] recovers the details the table-info pragmas do not
//!   report (CHECK, COLLATE, AUTOINCREMENT, table options).
//! - [`RenameSet`] and the [`DependentRewriter`] trait retarget index, view
//!   and trigger definitions after renames.
//! - [`validate_definition`] and [`validate_proposed`] reject definitions that
//!   could never be created.
//!
//! # Example
//!
//! ```
//! use schema_rebuild_core::*;
//!
//! let current = TableDefinition::new("people")
//!     .with_column(ColumnSpec::new("id", "INTEGER").primary_key())
//!     .with_column(ColumnSpec::new("name", "TEXT"));
//!
//! let mut proposed = ProposedTable::from_current(&current);
//! proposed.rename_column("name", "full_name");
//! proposed.column_mut("full_name").unwrap().not_null = true;
//! assert!(validate_proposed(&proposed, &current).is_empty());
//!
//! let renames = proposed.renames(&current);
//! assert_eq!(
//!     renames.rewrite("CREATE INDEX by_name ON people(name)"),
//!     "CREATE INDEX by_name ON people(full_name)"
//! );
//! assert!(proposed.to_definition().create_sql().contains("\"full_name\"\tTEXT NOT NULL"));
//! ```

mod ddl;
mod rewrite;
mod sql;
mod types;
mod validate;

pub use ddl::{ColumnClause, ForeignKeyDeferral, TableScan, scan_create_table};
pub use rewrite::{ColumnScope, DependentRewriter, RenameSet, RewriteOutcome, TextualRewriter, references_identifier};
pub use sql::{
    add_column_sql, column_sql, create_table_sql, drop_object_sql, has_inline_primary_key, is_keyword,
    is_plain_identifier, quote_identifier, quote_list, quote_literal, rename_table_sql, render_default,
};
pub use types::*;
pub use validate::{DefinitionError, validate_definition, validate_proposed};
