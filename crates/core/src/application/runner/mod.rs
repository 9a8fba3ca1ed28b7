// Job Runners
//
// A runner drives one engine-backed unit of work against a persisted job
// record: discovery crawls a site, testing re-checks known pages. Both share
// the same discipline: a fresh engine session per identity, cancellation
// polled at page and identity boundaries, and the session always closed no
// matter how the pass ends.

mod discovery;
mod testing;

pub use discovery::{DiscoveryParams, DiscoveryRunner, DiscoverySummary};
pub use testing::{TestingParams, TestingRunner, TestingSummary};

use crate::domain::Identity;
use crate::port::EngineSession;
use tracing::{debug, warn};

/// How one identity pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    Finished,
    CancelRequested,
    LoginFailed,
}

/// End an identity's authenticated state. Guests have nothing to end; sites
/// without a logout mechanism get their cookies cleared instead.
pub(crate) async fn end_identity(
    session: &mut Box<dyn EngineSession>,
    identity: &Identity,
) -> crate::error::Result<()> {
    if identity.is_guest() {
        return Ok(());
    }
    let outcome = session.logout().await?;
    if !outcome.success {
        debug!(identity = %identity, "No logout mechanism, clearing cookies instead");
        session.clear_cookies().await?;
    }
    Ok(())
}

/// Best-effort session close for paths that are already unwinding
pub(crate) async fn close_session(session: &mut Box<dyn EngineSession>) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close engine session");
    }
}
