//! GeoReport v2 registry client.
//!
//! Implements the engine's `Registry` trait over HTTP: date-range pages from
//! `requests.json` and point lookups from `requests/{id}.json`. Retry and
//! status classification live here; pagination and gap logic do not.

mod client;

pub use client::{ClientOptions, RegistryClient, DEFAULT_BASE_URL, USER_AGENT};
