use crate::error::FetchError;
use crate::model::{Page, Record, RecordId};
use crate::window::DateWindow;

/// Upstream registry as seen by the engine.
///
/// Implementations must be shareable across fetch workers. One call is one
/// logical request; any retry policy lives inside the implementation.
pub trait Registry: Sync {
    /// One page (1-based) of the date-range query for `window`.
    fn fetch_page(&self, window: &DateWindow, page: u32) -> Result<Page, FetchError>;

    /// Point lookup. `Ok(None)` for an empty result, `Err(NotFound)` for 404.
    fn fetch_by_id(&self, id: &RecordId) -> Result<Option<Record>, FetchError>;
}

impl<R: Registry + ?Sized> Registry for &R {
    fn fetch_page(&self, window: &DateWindow, page: u32) -> Result<Page, FetchError> {
        (**self).fetch_page(window, page)
    }

    fn fetch_by_id(&self, id: &RecordId) -> Result<Option<Record>, FetchError> {
        (**self).fetch_by_id(id)
    }
}
