//! Possible errors thrown while building or interpreting covenants

/// The error type returned by the covenant builders
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CovenantError {
    /// The requested offer cannot be represented by a covenant
    #[error("parameter infeasible: {0}")]
    ParameterInfeasible(String),
    /// Accepting would leave a remainder below the covenant's minimum
    #[error(
        "Accepting {accepted_atoms} atoms would leave an amount lower than the min acceptable by \
         the terms of this contract, and hence unacceptable. Accept fewer atoms or the full offer."
    )]
    UnacceptableRemainder {
        /// The number of atoms the taker tried to accept
        accepted_atoms: u64,
    },
    /// Accepting would leave a remainder priced below the dust limit
    #[error(
        "Accepting {accepted_atoms} atoms would leave an amount priced lower than dust. Accept \
         fewer atoms or the full offer."
    )]
    RemainderBelowDust {
        /// The number of atoms the taker tried to accept
        accepted_atoms: u64,
    },
    /// The accepted atoms are malformed for this covenant
    #[error("invalid accepted atoms: {0}")]
    InvalidAcceptedAtoms(String),
    /// An integer overflowed
    #[error("arithmetic overflow: {0}")]
    Overflow(String),
    /// Error (de)serializing a script or transaction
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Error producing or checking a signature
    #[error("signing error: {0}")]
    Signing(String),
    /// The protocol or covenant variant is not implemented
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The provided utxos cannot fuel the transaction
    #[error("{0}")]
    InsufficientFuel(String),
    /// Error assembling a transaction
    #[error("tx builder error: {0}")]
    TxBuilder(String),
}

impl CovenantError {
    /// Create a new parameter infeasible error
    #[allow(clippy::needless_pass_by_value)]
    pub fn infeasible<T: ToString>(msg: T) -> Self {
        Self::ParameterInfeasible(msg.to_string())
    }

    /// Create a new invalid accepted atoms error
    #[allow(clippy::needless_pass_by_value)]
    pub fn invalid_accepted<T: ToString>(msg: T) -> Self {
        Self::InvalidAcceptedAtoms(msg.to_string())
    }

    /// Create a new overflow error
    #[allow(clippy::needless_pass_by_value)]
    pub fn overflow<T: ToString>(msg: T) -> Self {
        Self::Overflow(msg.to_string())
    }

    /// Create a new serialization error
    #[allow(clippy::needless_pass_by_value)]
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a new signing error
    #[allow(clippy::needless_pass_by_value)]
    pub fn signing<T: ToString>(msg: T) -> Self {
        Self::Signing(msg.to_string())
    }

    /// Create a new unsupported error
    #[allow(clippy::needless_pass_by_value)]
    pub fn unsupported<T: ToString>(msg: T) -> Self {
        Self::Unsupported(msg.to_string())
    }

    /// Create a new tx builder error
    #[allow(clippy::needless_pass_by_value)]
    pub fn tx_builder<T: ToString>(msg: T) -> Self {
        Self::TxBuilder(msg.to_string())
    }
}
