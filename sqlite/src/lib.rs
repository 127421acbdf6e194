//! Transactional table rebuilds for SQLite databases.
//!
//! SQLite can add and rename columns in place but cannot change a column's
//! type or constraints, drop a constrained column or reorder columns. This
//! crate performs those edits by rebuilding the table: the rows are copied
//! into a new table of the desired shape, the tables are swapped and the
//! dependent indices, views and triggers are recreated against the new
//! shape. The whole rebuild runs inside a savepoint, so it either completes
//! or leaves the database exactly as it was.
//!
//! # Architecture
//!
//! - **`database`**: the [`Database`] handle with restore points and pragmas
//! - **`catalog`**: reads table structure and dependents from the catalog
//! - **`validator`**: checks whether existing rows satisfy a proposed shape
//! - **`rebuild`**: the copy/swap/restore transaction
//! - **`worker`**: runs a rebuild on a background thread
//! - **`config`**: [`EngineConfig`], loadable from YAML
//!
//! # Quick start
//!
//! ```no_run
//! use schema_rebuild_sqlite::{Database, EngineConfig, ProposedTable};
//!
//! let mut db = Database::open("app.db", EngineConfig::default()).unwrap();
//! let current = db.read_table("people").unwrap().table.unwrap();
//!
//! let mut proposed = ProposedTable::from_current(&current);
//! proposed.column_mut("email").unwrap().not_null = true;
//!
//! for verdict in db.validate_change("people", &proposed).unwrap() {
//!     if !verdict.satisfied {
//!         println!("{:?}: {}", verdict.kind, verdict.detail.unwrap_or_default());
//!     }
//! }
//!
//! let outcome = db.rebuild_table("people", &proposed).unwrap();
//! println!("{} rows copied", outcome.rows_copied);
//! db.release_all().unwrap();
//! ```

mod catalog;
mod config;
mod database;
mod error;
mod rebuild;
mod validator;
mod worker;

pub use catalog::{InboundForeignKey, SchemaCatalog, scan_entry};
pub use config::EngineConfig;
pub use database::Database;
pub use error::{RebuildError, Result};
pub use rebuild::{CancelToken, DependentFailure, RebuildOptions, RebuildOutcome, RebuildPlan};
pub use schema_rebuild_core::{
    CatalogEntry, ColumnScope, ColumnSpec, ConstraintKind, DependentRewriter, ForeignKeyRef, ObjectKind,
    ProposedColumn, ProposedTable, RenameSet, RewriteOutcome, TableDefinition, TableForeignKey, TextualRewriter,
    ValidationVerdict,
};
pub use validator::{
    check_autoincrement_integers, check_foreign_key_lock, check_not_null, check_primary_key_unique, check_unique,
    check_without_rowid, validate_change,
};
pub use worker::RebuildJob;
