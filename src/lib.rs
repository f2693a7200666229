//! Transaction sender for L2 tooling agents
//!
//! Higher-level agents (provers, proposers, relayers) hand this crate a
//! transaction to land on chain; it assigns the nonce, prices and signs
//! it, broadcasts it, tracks confirmation against a configurable depth,
//! and adaptively re-prices and resends on nonce races, underpriced
//! replacements and mempool timeouts. Outcomes come back on a per-id
//! completion channel; the chain is the durable source of truth.

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tx;

pub use chain::{ChainClient, ChainHead, ReceiptInfo, RpcClient, TxLookup};
pub use config::{SenderConfig, Settings};
pub use error::{SenderError, SenderResult};
pub use tx::{SenderRegistry, TransactionSender, TxOutcome, TxResolution};
