//! Two-phase reconciliation.
//!
//! Phase 1 sweeps the date range window by window. The gap analysis then
//! derives every ID below each partition's high-water mark that the sweep did
//! not return, and Phase 2 looks those up one by one. Whatever was collected
//! is flushed to the sink on every exit path.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::backfill::{IdBackfetcher, LookupOutcome, DEFAULT_BATCH_SIZE};
use crate::error::FetchError;
use crate::gaps::{self, GapReport, DEFAULT_MAX_GAP};
use crate::model::{Record, RecordId};
use crate::pool::{cancel_token, run_bounded, CancelToken};
use crate::range::{fetch_window, PAGE_SIZE};
use crate::rate::RateLimiter;
use crate::registry::Registry;
use crate::sink::{FlushGuard, RecordSink};
use crate::stats::SessionStats;
use crate::store::RecordStore;
use crate::window::{plan_windows, DateWindow, DEFAULT_WINDOW_DAYS};

/// Default worker count for both phases.
pub const DEFAULT_WORKERS: usize = 10;

/// Default minimum spacing between point lookups.
pub const DEFAULT_LOOKUP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub window_days: u32,
    pub sweep_workers: usize,
    pub lookup_workers: usize,
    pub batch_size: usize,
    pub lookup_interval: Duration,
    /// Largest per-partition gap that is still looked up ID by ID.
    pub max_gap: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            sweep_workers: DEFAULT_WORKERS,
            lookup_workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            lookup_interval: DEFAULT_LOOKUP_INTERVAL,
            max_gap: DEFAULT_MAX_GAP,
        }
    }
}

impl SessionOptions {
    fn validate(&self) -> Result<(), FetchError> {
        let checks = [
            (self.sweep_workers, "sweep worker count"),
            (self.lookup_workers, "lookup worker count"),
            (self.batch_size, "batch size"),
        ];
        for (value, what) in checks {
            if value == 0 {
                return Err(FetchError::Configuration(format!("{what} must be at least 1")));
            }
        }
        Ok(())
    }
}

/// One reconciliation run over `[start, end]`.
///
/// Owns the record store for its lifetime; nothing here is process-global.
pub struct ReconciliationSession<'r, R: Registry + ?Sized> {
    registry: &'r R,
    start: NaiveDate,
    end: NaiveDate,
    windows: Vec<DateWindow>,
    options: SessionOptions,
    cancel: CancelToken,
    store: RecordStore,
}

impl<'r, R: Registry + ?Sized> ReconciliationSession<'r, R> {
    pub fn new(registry: &'r R, start: NaiveDate, end: NaiveDate, options: SessionOptions) -> Result<Self, FetchError> {
        options.validate()?;
        let windows = plan_windows(start, end, options.window_days)?;
        Ok(Self {
            registry,
            start,
            end,
            windows,
            options,
            cancel: cancel_token(),
            store: RecordStore::new(),
        })
    }

    /// Share an externally owned cancellation flag (e.g. a signal handler's).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn windows(&self) -> &[DateWindow] {
        &self.windows
    }

    /// Merge records from an earlier run before sweeping. Returns how many
    /// distinct IDs were added.
    pub fn seed(&mut self, records: impl IntoIterator<Item = Record>) -> usize {
        self.store.merge_all(records)
    }

    /// Run both phases and persist the result into `sink`.
    ///
    /// Per-window and per-ID failures do not abort the run; they are counted
    /// in the returned stats. Cancellation stops scheduling new work, flushes
    /// what was collected and returns stats with `interrupted` set.
    pub fn run<S: RecordSink + ?Sized>(self, sink: &mut S) -> Result<SessionStats, FetchError> {
        let Self { registry, start, end, windows, options, cancel, store } = self;
        let started = Instant::now();

        let stats = SessionStats {
            start_date: start.to_string(),
            end_date: end.to_string(),
            seeded: store.len(),
            ..Default::default()
        };
        let mut guard = FlushGuard::new(sink, store, stats);

        sweep(&mut guard, registry, &windows, &options, &cancel);

        let report = gaps::analyze_with_limit(guard.store(), options.max_gap);
        log_gaps(&report, options.max_gap);
        guard.stats_mut().gaps = report.summaries();

        if cancel.load(Ordering::Relaxed) {
            log::warn!("interrupted after date sweep; skipping backfill");
        } else if report.is_complete() {
            log::info!("date sweep obtained full coverage; no backfill needed");
        } else if !report.has_lookups() {
            log::warn!("no partition has a gap small enough to backfill");
        } else {
            backfill(&mut guard, registry, &report.missing_ids(), &options, &cancel);
        }

        let interrupted = cancel.load(Ordering::Relaxed);
        let stats = guard.stats_mut();
        stats.interrupted = interrupted;
        stats.totals.duration_secs = started.elapsed().as_secs_f64();
        guard.finish()
    }
}

fn sweep<S, R>(guard: &mut FlushGuard<'_, S>, registry: &R, windows: &[DateWindow], options: &SessionOptions, cancel: &CancelToken)
where
    S: RecordSink + ?Sized,
    R: Registry + ?Sized,
{
    log::info!(
        "phase 1: sweeping {} window(s) of {} day(s) with {} worker(s)",
        windows.len(),
        options.window_days,
        options.sweep_workers
    );
    let phase_started = Instant::now();
    guard.stats_mut().phase1.windows = windows.len();

    run_bounded(
        windows,
        options.sweep_workers,
        cancel,
        |window| fetch_window(registry, window, PAGE_SIZE, cancel),
        |window, fetch| {
            let phase1 = &mut guard.stats_mut().phase1;
            phase1.pages += u64::from(fetch.pages);
            phase1.records_received += fetch.records.len();
            phase1.items_skipped += fetch.skipped;
            if fetch.error.is_some() {
                phase1.failed_windows += 1;
            }

            let received = fetch.records.len();
            let new = guard.store_mut().merge_all(fetch.records);
            match fetch.error {
                Some(e) => log::warn!("window {window}: kept {received} records before failure: {e}"),
                None => log::info!("window {window}: {received} records ({new} new)"),
            }
        },
    );

    let unique = guard.store().len();
    let phase1 = &mut guard.stats_mut().phase1;
    phase1.unique_after_merge = unique;
    phase1.duration_secs = phase_started.elapsed().as_secs_f64();
    log::info!(
        "phase 1 done: {} records received, {} unique, {} failed window(s) in {:.1}s",
        phase1.records_received,
        unique,
        phase1.failed_windows,
        phase1.duration_secs
    );
}

fn log_gaps(report: &GapReport, max_gap: usize) {
    for cov in report.partitions() {
        log::info!(
            "partition {}: {} observed, highest {}, {} missing ({:.1}% coverage)",
            cov.partition,
            cov.observed,
            cov.max_observed,
            cov.missing_count,
            cov.coverage_pct()
        );
    }
    for cov in report.over_limit() {
        log::warn!(
            "partition {}: {} missing IDs exceeds the limit of {max_gap}; not backfilling (highest ID {}-{})",
            cov.partition,
            cov.missing_count,
            cov.max_observed,
            cov.partition
        );
    }
}

fn backfill<S, R>(guard: &mut FlushGuard<'_, S>, registry: &R, missing: &[RecordId], options: &SessionOptions, cancel: &CancelToken)
where
    S: RecordSink + ?Sized,
    R: Registry + ?Sized,
{
    let batches = missing.len().div_ceil(options.batch_size);
    log::info!(
        "phase 2: backfilling {} missing ID(s) in {} batch(es)",
        missing.len(),
        batches
    );
    let phase_started = Instant::now();
    let fetcher = IdBackfetcher::new(registry, RateLimiter::new(options.lookup_interval));
    let mut failed: Vec<RecordId> = Vec::new();

    for (n, batch) in missing.chunks(options.batch_size).enumerate() {
        if cancel.load(Ordering::Relaxed) {
            log::warn!("interrupted before batch {}/{}", n + 1, batches);
            break;
        }

        let mut found = 0;
        run_bounded(
            batch,
            options.lookup_workers,
            cancel,
            |id| fetcher.resolve(id),
            |id, outcome| {
                guard.stats_mut().phase2.attempted += 1;
                match outcome {
                    LookupOutcome::Found(record) => {
                        guard.store_mut().merge(record);
                        guard.stats_mut().phase2.fetched += 1;
                        found += 1;
                    }
                    LookupOutcome::Tombstoned => guard.stats_mut().phase2.tombstoned += 1,
                    LookupOutcome::Failed(_) => failed.push(id.clone()),
                }
            },
        );
        log::info!("batch {}/{}: {} of {} found", n + 1, batches, found, batch.len());
    }

    failed.sort();
    let phase2 = &mut guard.stats_mut().phase2;
    phase2.failed = failed.len();
    phase2.failed_ids = failed.iter().map(ToString::to_string).collect();
    phase2.duration_secs = phase_started.elapsed().as_secs_f64();
    log::info!(
        "phase 2 done: {} fetched, {} tombstoned, {} failed in {:.1}s",
        phase2.fetched,
        phase2.tombstoned,
        phase2.failed,
        phase2.duration_secs
    );
}
