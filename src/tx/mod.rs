//! Transaction submission module: nonce sequencing, fee escalation,
//! pending-transaction tracking and the sender orchestrator

pub mod gas;
pub mod nonce;
pub mod registry;
pub mod sender;
pub mod types;

pub use gas::{FeeEscalator, FeeProposal};
pub use nonce::NonceSequencer;
pub use registry::PendingTransactionRegistry;
pub use sender::{SenderRegistry, TransactionSender};
pub use types::{TxData, TxOutcome, TxResolution};
