//! Persistence seam.
//!
//! The session hands its final sorted records and stats to a [`RecordSink`].
//! [`FlushGuard`] owns the in-progress store so that a panic or early return
//! still persists whatever was collected.

use crate::error::FetchError;
use crate::model::Record;
use crate::stats::SessionStats;
use crate::store::RecordStore;

pub trait RecordSink {
    /// Persist the finished (sorted) record list and the session stats.
    fn persist(&mut self, records: &[Record], stats: &SessionStats) -> Result<(), FetchError>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn persist(&mut self, records: &[Record], stats: &SessionStats) -> Result<(), FetchError> {
        (**self).persist(records, stats)
    }
}

/// Keeps the last persisted output in memory. Used by tests and by callers
/// that only want the records back.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
    pub stats: Option<SessionStats>,
    pub flushes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn persist(&mut self, records: &[Record], stats: &SessionStats) -> Result<(), FetchError> {
        self.records = records.to_vec();
        self.stats = Some(stats.clone());
        self.flushes += 1;
        Ok(())
    }
}

/// Scoped ownership of the store plus the sink it must end up in.
///
/// Call [`FlushGuard::finish`] on the normal path. If the guard is dropped
/// without it, the store is flushed with `interrupted` set.
pub struct FlushGuard<'s, S: RecordSink + ?Sized> {
    sink: &'s mut S,
    store: RecordStore,
    stats: SessionStats,
    flushed: bool,
}

impl<'s, S: RecordSink + ?Sized> FlushGuard<'s, S> {
    pub fn new(sink: &'s mut S, store: RecordStore, stats: SessionStats) -> Self {
        Self { sink, store, stats, flushed: false }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Sort, fill totals and persist. Returns the final stats.
    pub fn finish(mut self) -> Result<SessionStats, FetchError> {
        self.flush()?;
        Ok(std::mem::take(&mut self.stats))
    }

    fn flush(&mut self) -> Result<(), FetchError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let store = std::mem::take(&mut self.store);

        let totals = &mut self.stats.totals;
        totals.records = store.len();
        totals.by_partition = store.partition_counts();
        if let Some((earliest, latest)) = store.observed_range() {
            totals.earliest_observed = Some(earliest);
            totals.latest_observed = Some(latest);
        }

        let records = store.into_sorted();
        self.sink.persist(&records, &self.stats)
    }
}

impl<S: RecordSink + ?Sized> Drop for FlushGuard<'_, S> {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        self.stats.interrupted = true;
        if let Err(e) = self.flush() {
            log::error!("failed to flush partial results: {e}");
        }
    }
}
