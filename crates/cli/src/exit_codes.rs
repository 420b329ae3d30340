//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract. Scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, bad config)   |
//! | 3       | Universal        | File read/write error                    |
//! | 50-59   | fetch            | Registry and reconciliation outcomes     |
//! | 130     | Universal        | Interrupted by operator (SIGINT)         |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `fetch_exit_code` or the relevant command

use georeport_reconcile::FetchError;

// =============================================================================
// Universal
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, invalid dates, invalid config values.
pub const EXIT_USAGE: u8 = 2;

/// Cannot read or write a file (config, artifacts).
pub const EXIT_IO: u8 = 3;

/// Interrupted with Ctrl-C. Partial results were flushed.
pub const EXIT_INTERRUPTED: u8 = 130;

// =============================================================================
// Fetch (50-59)
// =============================================================================

/// Point lookup: the registry has no record for the ID (404 or empty).
pub const EXIT_FETCH_NOT_FOUND: u8 = 50;

/// Request rejected by the registry (4xx other than 404/429).
pub const EXIT_FETCH_VALIDATION: u8 = 52;

/// Rate limited after retries (429).
pub const EXIT_FETCH_RATE_LIMIT: u8 = 53;

/// Upstream error (5xx) or network failure after retries.
pub const EXIT_FETCH_UPSTREAM: u8 = 54;

/// Registry answered with a body of the wrong shape.
pub const EXIT_FETCH_MALFORMED: u8 = 55;

/// Fetch finished and wrote its artifacts, but some windows or IDs
/// could not be fetched. Rerun with `--resume` to retry them.
pub const EXIT_FETCH_INCOMPLETE: u8 = 56;

/// Map a registry/session error to its exit code.
pub fn fetch_exit_code(err: &FetchError) -> u8 {
    match err {
        FetchError::NotFound => EXIT_FETCH_NOT_FOUND,
        FetchError::Upstream { status: 429, .. } => EXIT_FETCH_RATE_LIMIT,
        FetchError::Upstream { status, .. } if *status >= 500 => EXIT_FETCH_UPSTREAM,
        FetchError::Upstream { .. } => EXIT_FETCH_VALIDATION,
        FetchError::Network(_) => EXIT_FETCH_UPSTREAM,
        FetchError::MalformedResponse(_) => EXIT_FETCH_MALFORMED,
        FetchError::Configuration(_) => EXIT_USAGE,
        FetchError::Persist(_) => EXIT_IO,
    }
}
