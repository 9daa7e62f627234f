//! Logging bootstrap for applications embedding the library.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CplError, Result};

/// Environment variable overriding the log filter, e.g. `CPL_LOG=cpl=debug`.
pub const LOG_ENV_VAR: &str = "CPL_LOG";

/// Install the global subscriber for the library's `tracing` output.
///
/// The filter comes from [`LOG_ENV_VAR`] when set, otherwise from
/// `fallback` (e.g. `"cpl=info"`). Reconnects and statement diagnostics
/// log at warn/error. Disclosures run on the calling threads, so thread
/// ids are included to tie interleaved operations back to their callers.
pub fn init_logging(fallback: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| CplError::InvalidArgument(format!("invalid log filter {fallback:?}: {e}")))?;
    fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| CplError::InvalidArgument("logging is already initialized".into()))
}
