//! Running a rebuild on a background thread.
//!
//! The database handle moves into the worker and comes back from
//! [`RebuildJob::join`], so the caller decides afterwards whether to write or
//! revert the pending changes.

use std::thread::{self, JoinHandle};

use schema_rebuild_core::ProposedTable;
use tracing::debug;

use crate::database::Database;
use crate::error::Result;
use crate::rebuild::{CancelToken, RebuildOptions, RebuildOutcome};

/// A rebuild in progress on its own thread.
pub struct RebuildJob {
    handle: JoinHandle<(Database, Result<RebuildOutcome>)>,
    cancel: CancelToken,
}

impl RebuildJob {
    /// Starts rebuilding `table` on a new thread.
    pub fn spawn(db: Database, table: impl Into<String>, proposed: ProposedTable) -> Result<Self> {
        Self::spawn_with_token(db, table, proposed, CancelToken::new())
    }

    /// Like [`spawn`](Self::spawn), using a caller-provided token. A token
    /// that is already cancelled stops the rebuild before the first batch.
    pub fn spawn_with_token(
        mut db: Database,
        table: impl Into<String>,
        proposed: ProposedTable,
        cancel: CancelToken,
    ) -> Result<Self> {
        let table = table.into();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("schema-rebuild".to_string())
            .spawn(move || {
                debug!(table = %table, "rebuild worker started");
                let options = RebuildOptions::default().with_cancel(token);
                let result = db.rebuild_table_with(&table, &proposed, &options);
                (db, result)
            })?;
        Ok(Self { handle, cancel })
    }

    /// Asks the worker to stop at the next batch boundary. The rebuild then
    /// fails with [`RebuildError::Cancelled`](crate::RebuildError::Cancelled)
    /// and leaves the table untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The token [`cancel`](Self::cancel) sets, for handing to other threads.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Returns `true` once the worker is done; [`join`](Self::join) then
    /// returns without blocking.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker and hands back the database with the result.
    pub fn join(self) -> (Database, Result<RebuildOutcome>) {
        match self.handle.join() {
            Ok(done) => done,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::RebuildError;

    fn db() -> Database {
        let db = Database::open_in_memory(EngineConfig::default()).unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT);
                 INSERT INTO items (label) VALUES ('a'), ('b'), ('c');",
            )
            .unwrap();
        db
    }

    fn proposal(db: &Database) -> ProposedTable {
        let current = db.read_table("items").unwrap().table.unwrap();
        let mut proposed = ProposedTable::from_current(&current);
        proposed.rename_column("label", "title");
        proposed
    }

    #[test]
    fn test_job_runs_to_completion() {
        let db = db();
        let proposed = proposal(&db);
        let job = RebuildJob::spawn(db, "items", proposed).unwrap();
        let (mut db, result) = job.join();
        assert_eq!(result.unwrap().rows_copied, 3);
        db.release_all().unwrap();
        let titles: i64 = db
            .connection()
            .query_row("SELECT COUNT(title) FROM items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(titles, 3);
    }

    #[test]
    fn test_cancelled_job_leaves_table_untouched() {
        let db = db();
        let proposed = proposal(&db);
        let token = CancelToken::new();
        token.cancel();
        let job = RebuildJob::spawn_with_token(db, "items", proposed, token).unwrap();
        let (db, result) = job.join();
        assert!(matches!(result, Err(RebuildError::Cancelled)));
        assert!(!db.is_dirty());
        let current = db.read_table("items").unwrap().table.unwrap();
        assert_eq!(current.column_names(), vec!["id", "label"]);
    }

    #[test]
    fn test_job_can_be_polled() {
        let db = db();
        let proposed = proposal(&db);
        let job = RebuildJob::spawn(db, "items", proposed).unwrap();
        let token = job.cancel_token().clone();
        while !job.is_finished() {
            thread::yield_now();
        }

        // Too late to stop anything, but the flag is shared.
        token.cancel();
        assert!(job.cancel_token().is_cancelled());
        let (_db, result) = job.join();
        assert_eq!(result.unwrap().rows_copied, 3);
    }
}
