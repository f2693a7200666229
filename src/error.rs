//! Error types for the transaction sender

use thiserror::Error;

/// Main error type for the sender
#[derive(Error, Debug, Clone)]
pub enum SenderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Nonce too low")]
    NonceTooLow,

    #[error("Transaction underpriced (blob: {blob})")]
    Underpriced { blob: bool },

    #[error("Replacement transaction underpriced (blob: {blob})")]
    ReplacementUnderpriced { blob: bool },

    #[error("Too many pending transactions")]
    TooManyPending,

    #[error("Transaction in mempool for too long")]
    MempoolTimeout,

    #[error("Transaction dropped without a receipt")]
    NotFound,

    #[error("Transaction reverted, hash: {tx_hash}")]
    Reverted { tx_hash: String },

    #[error("Retries exhausted after {retries} attempts")]
    RetriesExhausted { retries: u64 },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Unsupported transaction type: {0}")]
    UnsupportedTx(String),

    #[error("Inconsistent fee proposal: fee cap {fee_cap} below tip cap {tip_cap}")]
    InconsistentFee { fee_cap: u128, tip_cap: u128 },

    #[error("Sender already registered for chain {chain_id} and address {address}")]
    DuplicateSender { chain_id: u64, address: String },
}

impl SenderError {
    /// Refine a raw broadcast error into its txpool rejection class.
    ///
    /// Node rejections come back as opaque RPC messages; the substrings
    /// match go-ethereum's txpool error strings, including the blobpool's
    /// "new tx blob gas fee cap" message that identifies which cap was
    /// rejected.
    pub fn classify_broadcast(self) -> SenderError {
        let SenderError::Rpc(msg) = &self else {
            return self;
        };

        if msg.contains("nonce too low") {
            return SenderError::NonceTooLow;
        }
        if msg.contains("replacement transaction underpriced") {
            return SenderError::ReplacementUnderpriced {
                blob: msg.contains("blob gas fee cap"),
            };
        }
        if msg.contains("transaction underpriced") {
            return SenderError::Underpriced {
                blob: msg.contains("blob gas fee cap"),
            };
        }
        self
    }

    /// Check if the error is recoverable by the resend loop
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SenderError::NonceTooLow
                | SenderError::Underpriced { .. }
                | SenderError::ReplacementUnderpriced { .. }
                | SenderError::MempoolTimeout
                | SenderError::Rpc(_)
        )
    }

    /// Check if the error marks a transaction that timed out in the mempool
    pub fn is_mempool_timeout(&self) -> bool {
        matches!(self, SenderError::MempoolTimeout)
    }
}

/// Result type for sender operations
pub type SenderResult<T> = Result<T, SenderError>;
