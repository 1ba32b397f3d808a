//! Best-effort write-through to the history store.

use persistence::{HistoryStore, PersistenceError};
use tracing::error;
use twin_core::{JobRecord, TickSnapshot};

/// Wraps a [`HistoryStore`] so failed writes are logged and counted instead
/// of interrupting the simulation.
pub struct HistoryLog {
    store: Box<dyn HistoryStore>,
    failed_writes: u64,
}

impl HistoryLog {
    pub fn new<S: HistoryStore + 'static>(store: S) -> Self {
        Self {
            store: Box::new(store),
            failed_writes: 0,
        }
    }

    pub(crate) fn record_tick(&mut self, snapshot: &TickSnapshot) {
        if let Err(e) = self.store.record_tick(snapshot) {
            self.failed_writes += 1;
            error!(tick = snapshot.tick, error = %e, "failed to record tick snapshot");
        }
    }

    pub(crate) fn record_job(&mut self, record: &JobRecord) {
        if let Err(e) = self.store.record_job(record) {
            self.failed_writes += 1;
            error!(
                job_id = %record.job_id,
                status = %record.status,
                error = %e,
                "failed to record job"
            );
        }
    }

    /// Number of writes dropped since start.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    pub fn ticks(&self) -> Result<Vec<TickSnapshot>, PersistenceError> {
        self.store.ticks()
    }

    pub fn jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        self.store.jobs()
    }
}

impl std::fmt::Debug for HistoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLog")
            .field("failed_writes", &self.failed_writes)
            .finish_non_exhaustive()
    }
}
