use std::fmt;

/// Failure kinds seen while talking to the registry or persisting results.
///
/// `NotFound` is only an error at the transport layer. The backfetcher turns
/// it into a tombstone outcome, so it never shows up as a failure in stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure (connect, TLS, timeout, body read).
    Network(String),
    /// Non-2xx, non-404 response.
    Upstream { status: u16, message: String },
    /// 404 on a point lookup.
    NotFound,
    /// Response body did not have the expected shape.
    MalformedResponse(String),
    /// Invalid session input (dates, sizes). Fatal at session start.
    Configuration(String),
    /// The persistence collaborator rejected the flush.
    Persist(String),
}

impl FetchError {
    /// Errors worth another attempt with backoff. `NotFound` is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short stable label used in stats and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Upstream { .. } => "upstream",
            Self::NotFound => "not_found",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Configuration(_) => "configuration",
            Self::Persist(_) => "persist",
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Upstream { status, message } => write!(f, "upstream error ({status}): {message}"),
            Self::NotFound => write!(f, "not found"),
            Self::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::Persist(msg) => write!(f, "persist error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}
