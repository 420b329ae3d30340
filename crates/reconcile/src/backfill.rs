use crate::error::FetchError;
use crate::model::{Record, RecordId};
use crate::rate::{Clock, RateLimiter, RealClock};
use crate::registry::Registry;

/// IDs resolved per batch in the backfill phase.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Result of a single point lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(Record),
    /// The registry has no record for this ID (empty result or 404).
    Tombstoned,
    /// Transient or unexpected failure. The ID is still unresolved.
    Failed(FetchError),
}

impl LookupOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Resolves missing IDs one at a time, paced by a shared rate limiter.
pub struct IdBackfetcher<'r, R: Registry + ?Sized, C: Clock = RealClock> {
    registry: &'r R,
    limiter: RateLimiter<C>,
}

impl<'r, R: Registry + ?Sized> IdBackfetcher<'r, R, RealClock> {
    pub fn new(registry: &'r R, limiter: RateLimiter<RealClock>) -> Self {
        Self { registry, limiter }
    }
}

impl<'r, R: Registry + ?Sized, C: Clock> IdBackfetcher<'r, R, C> {
    pub fn with_limiter(registry: &'r R, limiter: RateLimiter<C>) -> Self {
        Self { registry, limiter }
    }

    pub fn resolve(&self, id: &RecordId) -> LookupOutcome {
        self.limiter.acquire();
        match self.registry.fetch_by_id(id) {
            Ok(Some(record)) if record.id() == id => LookupOutcome::Found(record),
            Ok(Some(record)) => LookupOutcome::Failed(FetchError::MalformedResponse(format!(
                "lookup for {id} returned {}",
                record.id()
            ))),
            Ok(None) | Err(FetchError::NotFound) => {
                log::debug!("{id}: tombstoned");
                LookupOutcome::Tombstoned
            }
            Err(e) => {
                log::warn!("{id}: lookup failed: {e}");
                LookupOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;
    use crate::pool::{cancel_token, run_bounded};
    use crate::window::DateWindow;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Lookups;

    impl Registry for Lookups {
        fn fetch_page(&self, _window: &DateWindow, _page: u32) -> Result<Page, FetchError> {
            Ok(Page::default())
        }

        fn fetch_by_id(&self, id: &RecordId) -> Result<Option<Record>, FetchError> {
            match id.sequence() {
                1 => Ok(Some(Record::new(id.clone(), Some("2026-01-01T00:00:00Z")))),
                2 => Ok(None),
                3 => Err(FetchError::NotFound),
                4 => Err(FetchError::Network("connection reset".into())),
                _ => Ok(Some(Record::new(RecordId::new(99, "2026"), None))),
            }
        }
    }

    /// Records when each lookup reached the registry.
    struct Timed {
        calls: Mutex<Vec<Instant>>,
    }

    impl Registry for Timed {
        fn fetch_page(&self, _window: &DateWindow, _page: u32) -> Result<Page, FetchError> {
            Ok(Page::default())
        }

        fn fetch_by_id(&self, id: &RecordId) -> Result<Option<Record>, FetchError> {
            self.calls.lock().unwrap().push(Instant::now());
            Ok(Some(Record::new(id.clone(), None)))
        }
    }

    fn fetcher(registry: &Lookups) -> IdBackfetcher<'_, Lookups> {
        IdBackfetcher::new(registry, RateLimiter::new(Duration::ZERO))
    }

    #[test]
    fn test_found() {
        let registry = Lookups;
        let outcome = fetcher(&registry).resolve(&RecordId::new(1, "2026"));
        assert!(outcome.is_found());
    }

    #[test]
    fn test_empty_result_and_404_are_tombstones() {
        let registry = Lookups;
        let f = fetcher(&registry);
        assert_eq!(f.resolve(&RecordId::new(2, "2026")), LookupOutcome::Tombstoned);
        assert_eq!(f.resolve(&RecordId::new(3, "2026")), LookupOutcome::Tombstoned);
    }

    #[test]
    fn test_network_error_is_failure() {
        let registry = Lookups;
        match fetcher(&registry).resolve(&RecordId::new(4, "2026")) {
            LookupOutcome::Failed(e) => assert_eq!(e.kind(), "network"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_id_is_malformed() {
        let registry = Lookups;
        match fetcher(&registry).resolve(&RecordId::new(5, "2026")) {
            LookupOutcome::Failed(e) => assert_eq!(e.kind(), "malformed_response"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_workers_share_one_pace() {
        let interval = Duration::from_millis(20);
        let registry = Timed { calls: Mutex::new(Vec::new()) };
        let fetcher = IdBackfetcher::new(&registry, RateLimiter::new(interval));
        let ids: Vec<RecordId> = (1..=8).map(|seq| RecordId::new(seq, "2026")).collect();

        let started = Instant::now();
        let done = run_bounded(&ids, 4, &cancel_token(), |id| fetcher.resolve(id), |_, outcome| {
            assert!(outcome.is_found());
        });
        assert_eq!(done, 8);

        // Each lookup waits for its own slot, so the k-th call cannot come
        // before k intervals have passed, however many workers there are.
        let mut calls = registry.calls.lock().unwrap().clone();
        calls.sort();
        for (k, at) in calls.iter().enumerate() {
            assert!(at.duration_since(started) >= interval * k as u32, "call {k} came too early");
        }
    }
}
