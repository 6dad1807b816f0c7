//! Errors returned by the offer book

use covenants::CovenantError;
use indexer::IndexerError;

/// The error type of the offer book
#[derive(Clone, Debug, thiserror::Error)]
pub enum OfferBookError {
    /// The indexer failed, passed through unchanged
    #[error(transparent)]
    Indexer(#[from] IndexerError),
    /// Building a covenant failed
    #[error(transparent)]
    Covenant(#[from] CovenantError),
    /// No lock time can be drawn from the window of past lock times
    #[error("lock time window is empty: {0}")]
    LockTimeWindow(String),
}

impl OfferBookError {
    /// Create a new lock time window error
    #[allow(clippy::needless_pass_by_value)]
    pub fn lock_time_window<T: ToString>(msg: T) -> Self {
        Self::LockTimeWindow(msg.to_string())
    }
}
