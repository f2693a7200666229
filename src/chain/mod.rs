//! Chain module - the JSON-RPC surface the sender depends on
//!
//! The sender talks to the chain through the [`RpcClient`] trait so tests
//! can drive it with a mock node; [`ChainClient`] is the production
//! implementation with multi-endpoint failover.

pub mod provider;

pub use provider::ChainClient;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::error::SenderResult;

/// View of the latest chain head the sender caches between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub number: u64,
    pub hash: B256,
    /// Base fee of the head block, in wei
    pub base_fee: u128,
}

/// Where a broadcast transaction currently is, as reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLookup {
    /// The node does not know the hash
    NotFound,
    /// Known but not yet included in a block
    Pending,
    /// Included in a block; a receipt is available
    Mined,
}

/// The receipt fields the sender acts on
#[derive(Debug, Clone)]
pub struct ReceiptInfo {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub effective_gas_price: u128,
    /// Set only for blob-carrying transactions
    pub blob_gas_price: Option<u128>,
}

/// Call fields forwarded to eth_estimateGas
#[derive(Debug, Clone, Default)]
pub struct GasEstimateRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// The Ethereum JSON-RPC calls the sender performs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Chain ID the client is connected to
    fn chain_id(&self) -> u64;

    /// Confirmed transaction count for an address at the latest block
    async fn nonce_at(&self, address: Address) -> SenderResult<u64>;

    /// Latest header
    async fn latest_header(&self) -> SenderResult<ChainHead>;

    /// Gas estimate for a call
    async fn estimate_gas(&self, call: GasEstimateRequest) -> SenderResult<u64>;

    /// Suggested priority fee, in wei
    async fn suggest_tip_cap(&self) -> SenderResult<u128>;

    /// Broadcast a signed, EIP-2718 encoded transaction
    async fn send_raw_transaction(&self, raw: Bytes) -> SenderResult<B256>;

    /// Look up a transaction by hash
    async fn transaction_by_hash(&self, hash: B256) -> SenderResult<TxLookup>;

    /// Receipt for a mined transaction, if any
    async fn transaction_receipt(&self, hash: B256) -> SenderResult<Option<ReceiptInfo>>;
}
