//! Paginated retrieval for one date window.

use crate::error::FetchError;
use crate::model::Record;
use crate::pool::CancelToken;
use crate::registry::Registry;
use crate::window::DateWindow;

use std::sync::atomic::Ordering;

/// Registry page size. A page this long always implies another page.
pub const PAGE_SIZE: usize = 100;

/// Everything one window fetch produced, including a partial result on error.
#[derive(Debug)]
pub struct WindowFetch {
    pub window: DateWindow,
    pub records: Vec<Record>,
    pub pages: u32,
    /// Items the registry returned that could not be turned into records.
    pub skipped: usize,
    pub error: Option<FetchError>,
}

/// Page through `window` until a short page.
///
/// Stops at the first error and returns the pages collected so far together
/// with that error. No retry happens here.
pub fn fetch_window<R: Registry + ?Sized>(
    registry: &R,
    window: &DateWindow,
    page_size: usize,
    cancel: &CancelToken,
) -> WindowFetch {
    let mut out = WindowFetch {
        window: *window,
        records: Vec::new(),
        pages: 0,
        skipped: 0,
        error: None,
    };

    let mut page_no = 1u32;
    loop {
        if cancel.load(Ordering::Relaxed) {
            log::debug!("window {window}: cancelled before page {page_no}");
            break;
        }

        match registry.fetch_page(window, page_no) {
            Ok(page) => {
                out.pages += 1;
                let item_count = page.item_count;
                out.skipped += item_count.saturating_sub(page.records.len());
                out.records.extend(page.records);
                log::debug!("window {window}: page {page_no} returned {item_count} items");

                if item_count < page_size {
                    break;
                }
                page_no += 1;
            }
            Err(e) => {
                log::warn!("window {window}: page {page_no} failed: {e}");
                out.error = Some(e);
                break;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Page, RecordId};
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// Serves scripted page sizes and counts requests.
    struct ScriptedPages {
        sizes: Vec<usize>,
        fail_on: Option<u32>,
        calls: AtomicU32,
    }

    impl ScriptedPages {
        fn new(sizes: &[usize]) -> Self {
            Self { sizes: sizes.to_vec(), fail_on: None, calls: AtomicU32::new(0) }
        }
    }

    impl Registry for ScriptedPages {
        fn fetch_page(&self, _window: &DateWindow, page: u32) -> Result<Page, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(page) {
                return Err(FetchError::Upstream { status: 500, message: "boom".into() });
            }
            let size = self.sizes.get(page as usize - 1).copied().unwrap_or(0);
            let offset: usize = self.sizes.iter().take(page as usize - 1).sum();
            let records = (0..size)
                .map(|i| Record::new(RecordId::new((offset + i + 1) as u32, "2026"), None))
                .collect();
            Ok(Page::from_records(records))
        }

        fn fetch_by_id(&self, _id: &RecordId) -> Result<Option<Record>, FetchError> {
            unreachable!("range fetch never looks up IDs")
        }
    }

    fn window() -> DateWindow {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 7).unwrap();
        DateWindow::new(start, end).unwrap()
    }

    fn no_cancel() -> CancelToken {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_three_pages_until_short_page() {
        let registry = ScriptedPages::new(&[100, 100, 37]);
        let fetch = fetch_window(&registry, &window(), PAGE_SIZE, &no_cancel());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetch.pages, 3);
        assert_eq!(fetch.records.len(), 237);
        assert!(fetch.error.is_none());
    }

    #[test]
    fn test_short_first_page_is_single_request() {
        let registry = ScriptedPages::new(&[42]);
        let fetch = fetch_window(&registry, &window(), PAGE_SIZE, &no_cancel());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetch.records.len(), 42);
    }

    #[test]
    fn test_full_page_then_empty_page() {
        let registry = ScriptedPages::new(&[100, 0]);
        let fetch = fetch_window(&registry, &window(), PAGE_SIZE, &no_cancel());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetch.records.len(), 100);
    }

    #[test]
    fn test_error_keeps_collected_pages() {
        let mut registry = ScriptedPages::new(&[100, 100, 37]);
        registry.fail_on = Some(2);
        let fetch = fetch_window(&registry, &window(), PAGE_SIZE, &no_cancel());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetch.pages, 1);
        assert_eq!(fetch.records.len(), 100);
        assert_eq!(fetch.error.unwrap().kind(), "upstream");
    }

    #[test]
    fn test_cancelled_window_makes_no_requests() {
        let registry = ScriptedPages::new(&[100, 100, 37]);
        let cancel = Arc::new(AtomicBool::new(true));
        let fetch = fetch_window(&registry, &window(), PAGE_SIZE, &cancel);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
        assert!(fetch.records.is_empty());
    }

    struct LossyPage;

    impl Registry for LossyPage {
        fn fetch_page(&self, _window: &DateWindow, page: u32) -> Result<Page, FetchError> {
            // Full raw page, one unusable item dropped: still implies page 2.
            if page == 1 {
                let records = (1..=99).map(|i| Record::new(RecordId::new(i, "2026"), None)).collect();
                Ok(Page { records, item_count: 100 })
            } else {
                Ok(Page::default())
            }
        }

        fn fetch_by_id(&self, _id: &RecordId) -> Result<Option<Record>, FetchError> {
            Ok(None)
        }
    }

    #[test]
    fn test_page_length_uses_raw_item_count() {
        let fetch = fetch_window(&LossyPage, &window(), PAGE_SIZE, &no_cancel());
        assert_eq!(fetch.pages, 2);
        assert_eq!(fetch.records.len(), 99);
        assert_eq!(fetch.skipped, 1);
    }
}
