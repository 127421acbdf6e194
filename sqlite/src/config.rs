//! Engine configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! foreign_keys: true
//! copy_batch_size: 5000
//! shadow_table: sqlitebrowser_rename_column_new_table
//! rebuild_savepoint: sqlitebrowser_rename_column
//! restore_point: RESTOREPOINT
//! drop_constraint_names: false
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for a [`Database`](crate::Database) handle.
///
/// # Examples
///
/// ```
/// use schema_rebuild_sqlite::EngineConfig;
///
/// let config: EngineConfig = serde_yaml::from_str("copy_batch_size: 10").unwrap();
/// assert_eq!(config.copy_batch_size, 10);
/// assert_eq!(config.restore_point, "RESTOREPOINT");
/// assert!(!config.foreign_keys);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable foreign-key enforcement when a database is opened.
    pub foreign_keys: bool,
    /// Rows copied per batch; cancellation is checked between batches.
    pub copy_batch_size: usize,
    /// Temporary name of the table being built.
    pub shadow_table: String,
    /// Savepoint wrapping a single rebuild.
    pub rebuild_savepoint: String,
    /// Outer savepoint that keeps edits pending until they are written.
    pub restore_point: String,
    /// Rebuild tables with `CONSTRAINT name` clauses and leave the names
    /// out. When off, such tables are refused.
    pub drop_constraint_names: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            foreign_keys: false,
            copy_batch_size: 1000,
            shadow_table: "sqlitebrowser_rename_column_new_table".to_string(),
            rebuild_savepoint: "sqlitebrowser_rename_column".to_string(),
            restore_point: "RESTOREPOINT".to_string(),
            drop_constraint_names: false,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::RebuildError::Io) if the file cannot be read, or
    /// [`Config`](crate::RebuildError::Config) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::RebuildError::Io) if the file cannot be written,
    /// or [`Config`](crate::RebuildError::Config) if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Batch size as a SQL `LIMIT` value, never below one.
    pub(crate) fn batch_limit(&self) -> i64 {
        i64::try_from(self.copy_batch_size.max(1)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let config = EngineConfig::default();
        assert_eq!(config.shadow_table, "sqlitebrowser_rename_column_new_table");
        assert_eq!(config.rebuild_savepoint, "sqlitebrowser_rename_column");
        assert_eq!(config.copy_batch_size, 1000);
    }

    #[test]
    fn test_batch_limit_is_at_least_one() {
        let config = EngineConfig {
            copy_batch_size: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.batch_limit(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yml");
        let config = EngineConfig {
            foreign_keys: true,
            copy_batch_size: 7,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/engine.yml").unwrap_err();
        assert!(matches!(err, crate::RebuildError::Io(_)));
    }
}
