//! Chain client with multi-RPC support and automatic failover

use super::{ChainHead, GasEstimateRequest, ReceiptInfo, RpcClient, TxLookup};
use crate::error::{SenderError, SenderResult};

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, TxKind, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Multi-provider JSON-RPC client with automatic failover
pub struct ChainClient {
    /// Providers over the configured endpoints (multiple for failover)
    providers: Vec<DynProvider>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Chain ID reported by the endpoints
    chain_id: u64,
}

impl ChainClient {
    /// Connect to the configured endpoints
    pub async fn connect(endpoints: &[String]) -> SenderResult<Self> {
        let mut providers = Vec::new();

        for url in endpoints {
            match ProviderBuilder::new().connect(url.as_str()).await {
                Ok(provider) => {
                    providers.push(provider.erased());
                    debug!(url = %url, "Added RPC provider");
                }
                Err(e) => {
                    warn!(url = %url, err = %e, "Failed to create RPC provider");
                }
            }
        }

        if providers.is_empty() {
            return Err(SenderError::Rpc("No valid RPC providers".to_string()));
        }

        let chain_id = providers[0]
            .get_chain_id()
            .await
            .map_err(|e| SenderError::Rpc(e.to_string()))?;

        Ok(Self {
            providers,
            current_provider: AtomicUsize::new(0),
            chain_id,
        })
    }

    /// Get the active provider
    fn active(&self) -> &DynProvider {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to the next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(provider = next, "RPC failover");
    }
}

#[async_trait]
impl RpcClient for ChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn nonce_at(&self, address: Address) -> SenderResult<u64> {
        self.active()
            .get_transaction_count(address)
            .await
            .map_err(|e| SenderError::Rpc(e.to_string()))
    }

    async fn latest_header(&self) -> SenderResult<ChainHead> {
        for _ in 0..self.providers.len() {
            match self
                .active()
                .get_block_by_number(BlockNumberOrTag::Latest)
                .await
            {
                Ok(Some(block)) => {
                    return Ok(ChainHead {
                        number: block.header.number,
                        hash: block.header.hash,
                        base_fee: block.header.base_fee_per_gas.unwrap_or_default() as u128,
                    });
                }
                Ok(None) => {
                    return Err(SenderError::Rpc("No latest block".to_string()));
                }
                Err(e) => {
                    warn!(err = %e, "Failed to fetch the latest header");
                    self.failover();
                }
            }
        }

        Err(SenderError::Rpc("All providers failed".to_string()))
    }

    async fn estimate_gas(&self, call: GasEstimateRequest) -> SenderResult<u64> {
        let req = TransactionRequest {
            from: Some(call.from),
            to: call.to.map(TxKind::Call),
            value: Some(call.value),
            input: TransactionInput::new(call.input),
            max_fee_per_gas: Some(call.max_fee_per_gas),
            max_priority_fee_per_gas: Some(call.max_priority_fee_per_gas),
            ..Default::default()
        };

        self.active()
            .estimate_gas(req)
            .await
            .map_err(|e| SenderError::GasEstimation(e.to_string()))
    }

    async fn suggest_tip_cap(&self) -> SenderResult<u128> {
        self.active()
            .get_max_priority_fee_per_gas()
            .await
            .map_err(|e| SenderError::Rpc(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> SenderResult<B256> {
        self.active()
            .send_raw_transaction(raw.as_ref())
            .await
            .map(|pending| *pending.tx_hash())
            .map_err(|e| SenderError::Rpc(e.to_string()))
    }

    async fn transaction_by_hash(&self, hash: B256) -> SenderResult<TxLookup> {
        let tx = self
            .active()
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| SenderError::Rpc(e.to_string()))?;

        Ok(match tx {
            None => TxLookup::NotFound,
            Some(tx) if tx.block_number.is_none() => TxLookup::Pending,
            Some(_) => TxLookup::Mined,
        })
    }

    async fn transaction_receipt(&self, hash: B256) -> SenderResult<Option<ReceiptInfo>> {
        let receipt = self
            .active()
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| SenderError::Rpc(e.to_string()))?;

        Ok(receipt.map(|r| ReceiptInfo {
            tx_hash: r.transaction_hash,
            block_number: r.block_number.unwrap_or_default(),
            success: r.status(),
            effective_gas_price: r.effective_gas_price,
            blob_gas_price: r.blob_gas_price,
        }))
    }
}
