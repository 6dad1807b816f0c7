//! Errors returned by indexer implementations

/// The error type of the indexer port
///
/// Offer queries pass these through unchanged
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IndexerError {
    /// The indexer could not be reached or failed to answer
    #[error("indexer rpc error: {0}")]
    Rpc(String),
    /// The requested tx, token or plugin is unknown
    #[error("not found: {0}")]
    NotFound(String),
    /// The ledger rejected a broadcast tx
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),
    /// A record returned by the indexer could not be decoded
    #[error("error decoding indexer record: {0}")]
    Decode(String),
}

impl IndexerError {
    /// Create a new rpc error
    #[allow(clippy::needless_pass_by_value)]
    pub fn rpc<T: ToString>(msg: T) -> Self {
        Self::Rpc(msg.to_string())
    }

    /// Create a new not found error
    #[allow(clippy::needless_pass_by_value)]
    pub fn not_found<T: ToString>(msg: T) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Create a new broadcast rejected error
    #[allow(clippy::needless_pass_by_value)]
    pub fn rejected<T: ToString>(msg: T) -> Self {
        Self::BroadcastRejected(msg.to_string())
    }

    /// Create a new decode error
    #[allow(clippy::needless_pass_by_value)]
    pub fn decode<T: ToString>(msg: T) -> Self {
        Self::Decode(msg.to_string())
    }
}
