//! Errors surfaced by the refresh controller.

use thiserror::Error;

/// Failure of a controller transition. Neither variant is retried.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Initial load failed; the session is over until the next activation.
    #[error("failed to fetch changesets")]
    Fetch(#[source] anyhow::Error),

    /// A background polling pass failed; polling is switched off and the
    /// data already loaded is kept.
    #[error("polling pass failed")]
    Poll(#[source] anyhow::Error),
}
