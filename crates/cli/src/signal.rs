//! Ctrl-C handling for `fetch`.
//!
//! The first SIGINT sets the session's cancel token: workers stop picking up
//! new windows and lookups, and the session flushes what it has. A second
//! SIGINT, arriving while the token is already set, exits immediately with
//! the interrupted exit code.

use std::sync::Arc;

use georeport_reconcile::pool::cancel_token;
use georeport_reconcile::CancelToken;
use signal_hook::consts::SIGINT;
use signal_hook::flag;

use crate::exit_codes::EXIT_INTERRUPTED;
use crate::CliError;

/// Create a cancel token that SIGINT will set.
pub fn install_cancel_handler() -> Result<CancelToken, CliError> {
    let token = cancel_token();
    register(&token).map_err(|e| CliError::io(format!("cannot install Ctrl-C handler: {e}")))?;
    Ok(token)
}

fn register(token: &CancelToken) -> std::io::Result<()> {
    // Registered first so it sees the token before this signal sets it.
    flag::register_conditional_shutdown(SIGINT, i32::from(EXIT_INTERRUPTED), Arc::clone(token))?;
    flag::register(SIGINT, Arc::clone(token))?;
    Ok(())
}
