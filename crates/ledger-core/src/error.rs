use crate::audit::ChainViolation;

/// Errors produced by ledger operations.
///
/// Integrity and not-found outcomes are normally returned as values
/// (`bool` / `Option`); this type covers the cases a caller has to act on.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger has not been initialized")]
    NotInitialized,

    #[error("chain failed validation with {} violation(s)", .violations.len())]
    InvalidChain { violations: Vec<ChainViolation> },

    #[error("genesis records can only be created by initialization")]
    GenesisPayload,

    #[error("custom record kind {0:?} is reserved for a built-in record type")]
    ReservedKind(String),

    #[error("difficulty {difficulty} exceeds the {max} hex digits of a hash")]
    InvalidDifficulty { difficulty: usize, max: usize },

    #[error("storage unavailable: {0:#}")]
    Storage(anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger {0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("proof secret must not be empty")]
    InvalidProofKey,
}

impl LedgerError {
    /// Storage faults are the only errors worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}
