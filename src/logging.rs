//! Logging bootstrap.
//!
//! The engine emits structured `tracing` events throughout: guard
//! decisions at `info!`/`warn!`, per-layer traversal progress and query
//! sizes at `debug!`. Nothing is observable until a subscriber is
//! installed; library consumers usually bring their own, and this helper
//! covers binaries and test harnesses that don't.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{GraphError, Result};

/// Installs the global subscriber with the given filter directives, e.g.
/// `"relgraph=debug"` or `"warn,relgraph=info"`.
///
/// Installation is process-wide and first-wins; harnesses that may race
/// should ignore the second-caller error:
///
/// ```rust
/// let _ = relgraph::logging::init_logging("relgraph=info");
/// ```
///
/// # Errors
/// * [`GraphError::InvalidArgument`] for an unparsable directive, or when
///   a global subscriber is already installed.
pub fn init_logging(directives: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directives)
        .map_err(|e| GraphError::InvalidArgument(format!("invalid log filter: {e}")))?;
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|_| GraphError::InvalidArgument("logging already initialized".into()))
}
