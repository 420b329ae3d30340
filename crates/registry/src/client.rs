use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use std::sync::atomic::Ordering;

use georeport_reconcile::{CancelToken, DateWindow, FetchError, Page, Record, RecordId, Registry};
use serde_json::Value;
use url::Url;

// ── Constants ───────────────────────────────────────────────────────

/// Cologne's "Sag's uns" GeoReport endpoint.
pub const DEFAULT_BASE_URL: &str = "https://sags-uns.stadt-koeln.de/georeport/v2";
pub const USER_AGENT: &str = concat!("georeport/", env!("CARGO_PKG_VERSION"));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Granularity at which retry waits notice cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);
const BODY_SNIPPET: usize = 200;

// ── Options ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub base_url: String,
    /// Per-request timeout. A timeout counts as a network error.
    pub timeout: Duration,
    /// Retries after the first attempt for 429, 5xx and transport errors.
    pub max_retries: u32,
    /// First backoff delay; doubled after every retry.
    pub retry_backoff: Duration,
    /// Cap on a 429's `Retry-After`.
    pub max_retry_after: Duration,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

// ── RegistryClient ──────────────────────────────────────────────────

/// Blocking GeoReport v2 client with retry, backoff and status classification.
///
/// - 2xx: body parsed as JSON (a leading BOM is tolerated)
/// - 404: [`FetchError::NotFound`], never retried
/// - 429 / 5xx: retried with exponential backoff, `Retry-After` honoured on 429
/// - other 4xx: [`FetchError::Upstream`] immediately
/// - transport errors: retried, then [`FetchError::Network`]
///
/// With a cancel token attached, a pending retry is abandoned as soon as the
/// token is set and the last error is returned.
pub struct RegistryClient {
    http: reqwest::blocking::Client,
    base_url: String,
    options: ClientOptions,
    cancel: Option<CancelToken>,
}

impl RegistryClient {
    pub fn new(options: ClientOptions) -> Result<Self, FetchError> {
        let parsed = Url::parse(&options.base_url)
            .map_err(|e| FetchError::Configuration(format!("invalid base URL {:?}: {e}", options.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Configuration(format!(
                "base URL must be http or https, got {}",
                parsed.scheme()
            )));
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            options,
            cancel: None,
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Sleep for `duration` unless cancelled first. Returns false on cancel.
    fn pause(&self, duration: Duration) -> bool {
        if self.cancel.is_none() {
            thread::sleep(duration);
            return true;
        }
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(CANCEL_POLL));
        }
    }

    /// Default options pointed at another registry (or a mock server).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, FetchError> {
        Self::new(ClientOptions {
            base_url: base_url.into(),
            ..ClientOptions::default()
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| FetchError::Configuration(format!("invalid request URL {raw:?}: {e}")))
    }

    /// GET with retry + exponential backoff, returning the parsed JSON body.
    fn request_json(&self, url: &Url, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let mut backoff = self.options.retry_backoff;
        let mut attempt = 0u32;

        loop {
            let result = self.http.get(url.clone()).query(query).send();

            let (err, retry_wait) = match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if resp.status().is_success() {
                        let text = resp
                            .text()
                            .map_err(|e| FetchError::Network(format!("failed to read response body: {e}")))?;
                        let trimmed = text.trim_start_matches('\u{feff}');
                        return serde_json::from_str(trimmed).map_err(|e| {
                            FetchError::MalformedResponse(format!("invalid JSON: {e} (body: {})", snippet(trimmed)))
                        });
                    }

                    if status == 404 {
                        return Err(FetchError::NotFound);
                    }

                    let retryable = status == 429 || status >= 500;
                    let retry_after = if status == 429 {
                        resp.headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.trim().parse::<u64>().ok())
                            .map(|secs| Duration::from_secs(secs).min(self.options.max_retry_after))
                    } else {
                        None
                    };
                    let message = snippet(&resp.text().unwrap_or_default());
                    let err = FetchError::Upstream { status, message };

                    if !retryable || attempt >= self.options.max_retries {
                        return Err(err);
                    }
                    log::warn!(
                        "retry {}/{} for {} (HTTP {status})",
                        attempt + 1,
                        self.options.max_retries,
                        url.path()
                    );
                    (err, retry_after.unwrap_or(backoff))
                }
                Err(e) => {
                    if attempt >= self.options.max_retries {
                        return Err(FetchError::Network(e.to_string()));
                    }
                    log::warn!(
                        "retry {}/{} for {}: {e}",
                        attempt + 1,
                        self.options.max_retries,
                        url.path()
                    );
                    (FetchError::Network(e.to_string()), backoff)
                }
            };

            if !self.pause(retry_wait) {
                log::debug!("cancelled while waiting to retry {}", url.path());
                return Err(err);
            }
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }
}

impl Registry for RegistryClient {
    fn fetch_page(&self, window: &DateWindow, page: u32) -> Result<Page, FetchError> {
        let url = self.endpoint("requests.json")?;
        let query = [
            ("start_date", format_date(window.start)),
            ("end_date", format_date(window.end)),
            ("extensions", "true".to_string()),
            ("page", page.to_string()),
        ];

        let items = match self.request_json(&url, &query)? {
            Value::Array(items) => items,
            other => {
                return Err(FetchError::MalformedResponse(format!(
                    "expected array from requests.json, got {}",
                    snippet(&other.to_string())
                )))
            }
        };

        let item_count = items.len();
        let mut records = Vec::with_capacity(item_count);
        for item in items {
            match Record::from_value(item) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("window {window} page {page}: skipping item: {e}"),
            }
        }
        Ok(Page { records, item_count })
    }

    fn fetch_by_id(&self, id: &RecordId) -> Result<Option<Record>, FetchError> {
        let url = self.endpoint(&format!("requests/{id}.json"))?;

        let items = match self.request_json(&url, &[])? {
            Value::Array(items) => items,
            other => {
                return Err(FetchError::MalformedResponse(format!(
                    "expected array for {id}, got {}",
                    snippet(&other.to_string())
                )))
            }
        };

        if items.is_empty() {
            return Ok(None);
        }
        let count = items.len();
        let mut first_err = None;
        for item in items {
            match Record::from_value(item) {
                Ok(record) if record.id() == id => return Ok(Some(record)),
                Ok(_) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| {
            FetchError::MalformedResponse(format!("lookup for {id} returned {count} record(s), none matching"))
        }))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn snippet(text: &str) -> String {
    text.chars().take(BODY_SNIPPET).collect()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> RegistryClient {
        RegistryClient::new(ClientOptions {
            base_url: server.base_url(),
            retry_backoff: Duration::from_millis(1),
            ..ClientOptions::default()
        })
        .unwrap()
    }

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_fetch_page_sends_window_and_page() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/requests.json")
                .query_param("start_date", "2026-01-01")
                .query_param("end_date", "2026-01-07")
                .query_param("extensions", "true")
                .query_param("page", "2");
            then.status(200).json_body(json!([
                {"service_request_id": "12-2026", "requested_datetime": "2026-01-02T10:00:00+01:00"},
                {"service_request_id": "13-2026", "requested_datetime": "2026-01-03T10:00:00+01:00"}
            ]));
        });

        let page = client(&server).fetch_page(&window(), 2).unwrap();
        mock.assert();
        assert_eq!(page.item_count, 2);
        assert_eq!(page.records[1].id(), &RecordId::new(13, "2026"));
    }

    #[test]
    fn test_fetch_page_skips_unusable_items_but_counts_them() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(200).json_body(json!([
                {"service_request_id": "1-2026"},
                {"service_request_id": "garbage"},
                {"description": "no id"}
            ]));
        });

        let page = client(&server).fetch_page(&window(), 1).unwrap();
        assert_eq!(page.item_count, 3);
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn test_fetch_page_object_body_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(200).json_body(json!({"error": "nope"}));
        });

        let err = client(&server).fetch_page(&window(), 1).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn test_bom_prefixed_body_parses() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(200).body("\u{feff}[{\"service_request_id\":\"5-2026\"}]");
        });

        let page = client(&server).fetch_page(&window(), 1).unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn test_lookup_found() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests/4-2026.json");
            then.status(200)
                .json_body(json!([{"service_request_id": "4-2026", "status": "closed"}]));
        });

        let record = client(&server).fetch_by_id(&RecordId::new(4, "2026")).unwrap().unwrap();
        mock.assert();
        assert_eq!(record.field("status"), Some(&json!("closed")));
    }

    #[test]
    fn test_lookup_404_is_not_found_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests/7-2026.json");
            then.status(404).body("Not Found");
        });

        let err = client(&server).fetch_by_id(&RecordId::new(7, "2026")).unwrap_err();
        assert_eq!(err, FetchError::NotFound);
        mock.assert_calls(1);
    }

    #[test]
    fn test_lookup_empty_array_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/requests/7-2026.json");
            then.status(200).json_body(json!([]));
        });

        assert_eq!(client(&server).fetch_by_id(&RecordId::new(7, "2026")).unwrap(), None);
    }

    #[test]
    fn test_lookup_without_match_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/requests/7-2026.json");
            then.status(200).json_body(json!([
                {"service_request_id": "8-2026"},
                {"service_request_id": "9-2026"}
            ]));
        });

        let err = client(&server).fetch_by_id(&RecordId::new(7, "2026")).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn test_server_error_retried_then_upstream() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(503).body("maintenance");
        });

        let err = client(&server).fetch_page(&window(), 1).unwrap_err();
        assert_eq!(err, FetchError::Upstream { status: 503, message: "maintenance".into() });
        // 1 initial + 3 retries
        mock.assert_calls(4);
    }

    #[test]
    fn test_rate_limit_honours_retry_after() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(429).header("retry-after", "0").body("slow down");
        });

        let err = client(&server).fetch_page(&window(), 1).unwrap_err();
        assert!(err.is_retryable());
        mock.assert_calls(4);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(429).header("retry-after", "3600").body("slow down");
        });

        let client = RegistryClient::new(ClientOptions {
            base_url: server.base_url(),
            max_retries: 1,
            max_retry_after: Duration::from_millis(10),
            ..ClientOptions::default()
        })
        .unwrap();

        let started = Instant::now();
        let err = client.fetch_page(&window(), 1).unwrap_err();
        assert_eq!(err.kind(), "upstream");
        assert!(started.elapsed() < Duration::from_secs(30));
        mock.assert_calls(2);
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests/4-2026.json");
            then.status(503).body("maintenance");
        });

        let cancel = georeport_reconcile::pool::cancel_token();
        cancel.store(true, Ordering::SeqCst);
        let client = RegistryClient::new(ClientOptions {
            base_url: server.base_url(),
            retry_backoff: Duration::from_secs(30),
            ..ClientOptions::default()
        })
        .unwrap()
        .with_cancel_token(cancel);

        let err = client.fetch_by_id(&RecordId::new(4, "2026")).unwrap_err();
        assert_eq!(err, FetchError::Upstream { status: 503, message: "maintenance".into() });
        mock.assert_calls(1);
    }

    #[test]
    fn test_client_error_fails_immediately() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/requests.json");
            then.status(400).body("bad date");
        });

        let err = client(&server).fetch_page(&window(), 1).unwrap_err();
        assert_eq!(err.kind(), "upstream");
        mock.assert_calls(1);
    }

    #[test]
    fn test_invalid_base_url_is_configuration_error() {
        let err = RegistryClient::with_base_url("ftp://example.org").err().unwrap();
        assert_eq!(err.kind(), "configuration");
        assert!(RegistryClient::with_base_url("not a url").is_err());
    }
}
