//! `georeport-reconcile`: two-phase reconciliation engine for paginated
//! GeoReport registries.
//!
//! Pure engine crate: talks to the registry through the [`Registry`] trait and
//! hands results to a [`RecordSink`]. No HTTP, CLI or file IO dependencies.

pub mod backfill;
pub mod error;
pub mod gaps;
pub mod model;
pub mod pool;
pub mod range;
pub mod rate;
pub mod registry;
pub mod session;
pub mod sink;
pub mod stats;
pub mod store;
pub mod window;

pub use backfill::{IdBackfetcher, LookupOutcome};
pub use error::FetchError;
pub use gaps::{analyze, GapReport};
pub use model::{ObservedAt, Page, Record, RecordId};
pub use pool::CancelToken;
pub use registry::Registry;
pub use session::{ReconciliationSession, SessionOptions};
pub use sink::{MemorySink, RecordSink};
pub use stats::SessionStats;
pub use store::RecordStore;
pub use window::DateWindow;
