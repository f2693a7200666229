//! Transaction sender orchestrator
//!
//! Owns the public submit API and the background confirmation loop. All
//! signing and broadcasting is serialized behind one mutex that also owns
//! the nonce sequencer, so concurrent submitters never race on the
//! counter. Callers block on that mutex only for sign+broadcast;
//! confirmation is asynchronous and delivered on a per-id channel.

use crate::chain::{ChainHead, GasEstimateRequest, RpcClient, TxLookup};
use crate::config::SenderConfig;
use crate::error::{SenderError, SenderResult};
use crate::metrics;
use crate::tx::gas::{FeeEscalator, FeeProposal};
use crate::tx::nonce::NonceSequencer;
use crate::tx::registry::PendingTransactionRegistry;
use crate::tx::types::{
    sign_tx_data, BlobFields, Eip1559Fields, TxData, TxOutcome, TxResolution,
};

use alloy::consensus::TxEnvelope;
use alloy::eips::eip4844::BlobTransactionSidecar;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Immediate local attempts per broadcast before the resend tick takes over
const SEND_ATTEMPTS: usize = 3;

/// Starting blob fee cap for newly built blob transactions, in wei. The
/// escalator's strict-increase bump converges from here on rejection.
const INITIAL_BLOB_FEE: u128 = 1_000_000_000;

/// Forbids two senders for one signing key on one chain.
///
/// Owned by the application's composition root and injected into every
/// sender; registering a duplicate (chain_id, address) pair fails
/// construction.
#[derive(Debug, Default)]
pub struct SenderRegistry {
    slots: StdMutex<HashSet<(u64, Address)>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, chain_id: u64, address: Address) -> SenderResult<()> {
        let mut slots = self.slots.lock().unwrap();
        if !slots.insert((chain_id, address)) {
            return Err(SenderError::DuplicateSender {
                chain_id,
                address: address.to_string(),
            });
        }
        Ok(())
    }

    fn release(&self, chain_id: u64, address: Address) {
        self.slots.lock().unwrap().remove(&(chain_id, address));
    }
}

/// Builds, signs, broadcasts and confirms transactions for one signing key
pub struct TransactionSender {
    config: SenderConfig,
    rpc: Arc<dyn RpcClient>,
    signer: PrivateKeySigner,
    address: Address,
    chain_id: u64,
    escalator: FeeEscalator,
    registry: PendingTransactionRegistry,
    sender_registry: Arc<SenderRegistry>,
    /// Serializes sign+broadcast and owns the nonce counter
    send_slot: Mutex<NonceSequencer>,
    /// Latest observed header
    head: RwLock<ChainHead>,
    /// Fee fields proposed for newly built transactions
    fee_proposal: RwLock<FeeProposal>,
    shutdown: watch::Sender<bool>,
    loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl TransactionSender {
    /// Create a sender for the given signing key and spawn its
    /// confirmation loop
    pub async fn new(
        config: SenderConfig,
        rpc: Arc<dyn RpcClient>,
        signer: PrivateKeySigner,
        sender_registry: Arc<SenderRegistry>,
    ) -> SenderResult<Arc<Self>> {
        let chain_id = rpc.chain_id();
        let address = signer.address();
        sender_registry.register(chain_id, address)?;

        let escalator = FeeEscalator::new(&config);
        let init = async {
            let head = rpc.latest_header().await?;
            let tip = rpc.suggest_tip_cap().await?;
            let proposal = escalator.recompute_default_fee(head.base_fee, tip)?;
            let mut sequencer = NonceSequencer::new(address);
            sequencer.next(rpc.as_ref(), true).await?;
            Ok::<_, SenderError>((head, proposal, sequencer))
        };
        let (head, proposal, sequencer) = match init.await {
            Ok(v) => v,
            Err(e) => {
                sender_registry.release(chain_id, address);
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let sender = Arc::new(Self {
            registry: PendingTransactionRegistry::new(config.max_pending_txs),
            config,
            rpc,
            signer,
            address,
            chain_id,
            escalator,
            sender_registry,
            send_slot: Mutex::new(sequencer),
            head: RwLock::new(head),
            fee_proposal: RwLock::new(proposal),
            shutdown,
            loop_handle: StdMutex::new(None),
        });

        let handle = tokio::spawn({
            let sender = sender.clone();
            async move { sender.run_loop(shutdown_rx).await }
        });
        *sender.loop_handle.lock().unwrap() = Some(handle);

        info!(chain_id, address = %address, "Transaction sender started");
        Ok(sender)
    }

    /// The sender's signing address
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Current fee fields proposed for newly built transactions
    pub async fn default_fee(&self) -> FeeProposal {
        *self.fee_proposal.read().await
    }

    /// Number of unconfirmed transactions currently tracked
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Completion channel for a submitted transaction. Each id has exactly
    /// one receiver; a second call returns None.
    pub fn take_outcome_channel(&self, id: &str) -> Option<oneshot::Receiver<TxOutcome>> {
        let rx = self.registry.take_receiver(id);
        if rx.is_none() {
            warn!(id, "Transaction not found");
        }
        rx
    }

    /// Most recently broadcast envelope for an unconfirmed transaction
    pub async fn unconfirmed_tx(&self, id: &str) -> Option<TxEnvelope> {
        let entry = self.registry.get(id)?;
        let entry = entry.lock().await;
        entry.current.clone()
    }

    /// Build and submit a transaction from raw fields.
    ///
    /// A sidecar makes it a blob transaction, otherwise a dynamic-fee one.
    /// Gas is estimated when the configured gas limit is 0. An absent
    /// nonce is taken fresh from the sequencer under the send lock.
    pub async fn submit_raw(
        &self,
        nonce: Option<u64>,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        sidecar: Option<BlobTransactionSidecar>,
    ) -> SenderResult<String> {
        let proposal = *self.fee_proposal.read().await;

        let gas_limit = if self.config.gas_limit != 0 {
            self.config.gas_limit
        } else {
            self.rpc
                .estimate_gas(GasEstimateRequest {
                    from: self.address,
                    to,
                    value,
                    input: data.clone(),
                    max_fee_per_gas: proposal.max_fee_per_gas,
                    max_priority_fee_per_gas: proposal.max_priority_fee_per_gas,
                })
                .await?
        };

        let tx_data = match sidecar {
            Some(sidecar) => TxData::Blob(BlobFields {
                chain_id: self.chain_id,
                nonce: nonce.unwrap_or_default(),
                to: to.unwrap_or(Address::ZERO),
                value,
                input: data,
                gas_limit,
                max_fee_per_gas: proposal.max_fee_per_gas,
                max_priority_fee_per_gas: proposal.max_priority_fee_per_gas,
                max_fee_per_blob_gas: INITIAL_BLOB_FEE.min(self.config.max_blob_fee),
                sidecar,
            }),
            None => TxData::Eip1559(Eip1559Fields {
                chain_id: self.chain_id,
                nonce: nonce.unwrap_or_default(),
                to: to.map(TxKind::Call).unwrap_or(TxKind::Create),
                value,
                input: data,
                gas_limit,
                max_fee_per_gas: proposal.max_fee_per_gas,
                max_priority_fee_per_gas: proposal.max_priority_fee_per_gas,
            }),
        };

        self.submit(tx_data, nonce.is_none()).await
    }

    /// Submit an existing transaction, decomposed back into mutable fields
    /// so it can be re-priced and resent. The nonce is taken fresh from
    /// the sequencer.
    pub async fn submit_prebuilt(&self, envelope: &TxEnvelope) -> SenderResult<String> {
        let tx_data = TxData::from_envelope(envelope)?;
        self.submit(tx_data, true).await
    }

    /// Shared admission + first broadcast
    async fn submit(&self, tx_data: TxData, fresh_nonce: bool) -> SenderResult<String> {
        let id = match self.registry.submit(tx_data, fresh_nonce) {
            Ok(id) => id,
            Err(e) => {
                metrics::record_capacity_rejected();
                return Err(e);
            }
        };
        metrics::set_pending(self.registry.len());

        match self.send(&id, false).await {
            Ok(()) => Ok(id),
            Err(e) if e.is_recoverable() => {
                // The resend tick owns the entry from here
                warn!(id = %id, err = %e, "Broadcast unsettled, deferring to resend loop");
                Ok(id)
            }
            Err(e) => {
                error!(id = %id, err = %e, "Failed to send transaction");
                self.registry.remove(&id);
                metrics::set_pending(self.registry.len());
                Err(e)
            }
        }
    }

    /// Sign and broadcast one entry, serialized behind the send mutex.
    ///
    /// Loops over at most `SEND_ATTEMPTS` immediate attempts, resyncing
    /// the nonce on "nonce too low" and escalating the rejected fee on
    /// underpriced replacements. Every failed attempt records the entry's
    /// last_error; the nonce advances only on a successful broadcast.
    async fn send(&self, id: &str, resync_nonce: bool) -> SenderResult<()> {
        let entry_arc = self
            .registry
            .get(id)
            .ok_or_else(|| SenderError::Rpc(format!("unknown transaction id {id}")))?;

        let mut sequencer = self.send_slot.lock().await;
        let mut entry = entry_arc.lock().await;

        if resync_nonce || entry.fresh_nonce {
            let nonce = sequencer.next(self.rpc.as_ref(), resync_nonce).await?;
            entry.tx_data.set_nonce(nonce);
            entry.fresh_nonce = false;
        }

        let mut last_err = SenderError::Rpc("no broadcast attempt".to_string());
        for attempt in 0..SEND_ATTEMPTS {
            let (envelope, raw) = sign_tx_data(&self.signer, &entry.tx_data)?;
            let hash = *envelope.tx_hash();
            entry.current = Some(envelope);

            match self.rpc.send_raw_transaction(raw).await {
                Ok(_) => {
                    entry.last_error = None;
                    // New hash, new mempool observation
                    entry.observed = false;
                    sequencer.advance();
                    metrics::record_tx_sent(entry.tx_data.kind_name());
                    debug!(id, nonce = entry.tx_data.nonce(), hash = %hash, "Transaction broadcast");
                    return Ok(());
                }
                Err(e) => {
                    let err = e.classify_broadcast();
                    entry.last_error = Some(err.clone());
                    match &err {
                        SenderError::NonceTooLow => {
                            let nonce = sequencer.next(self.rpc.as_ref(), true).await?;
                            entry.tx_data.set_nonce(nonce);
                            warn!(id, nonce, hash = %hash, attempt, "Nonce too low, resynced");
                        }
                        SenderError::Underpriced { blob }
                        | SenderError::ReplacementUnderpriced { blob } => {
                            if *blob {
                                self.escalator.adjust_blob_gas_fee(&mut entry.tx_data);
                            } else {
                                self.escalator.adjust_gas_fee(&mut entry.tx_data);
                            }
                            warn!(id, hash = %hash, attempt, err = %err, "Underpriced, fee escalated");
                        }
                        SenderError::Rpc(_) => {
                            warn!(id, hash = %hash, attempt, err = %err, "Broadcast failed");
                        }
                        _ => {
                            error!(id, hash = %hash, err = %err, "Failed to send transaction");
                            return Err(err);
                        }
                    }
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Main event loop: a head-poll tick and a resend tick until shutdown
    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut head_ticker = interval(self.config.head_poll_interval);
        let mut resend_ticker = interval(self.config.resend_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = resend_ticker.tick() => self.resend_unconfirmed().await,
                _ = head_ticker.tick() => self.poll_head().await,
            }
        }

        info!("Confirmation loop stopped");
    }

    /// Head-poll tick: skip unchanged heads, otherwise refresh the default
    /// fee proposal and run one confirmation pass
    async fn poll_head(&self) {
        let new_head = match self.rpc.latest_header().await {
            Ok(head) => head,
            Err(e) => {
                warn!(err = %e, "Failed to get the latest header");
                return;
            }
        };

        if new_head.hash == self.head.read().await.hash {
            return;
        }
        *self.head.write().await = new_head;

        match self.rpc.suggest_tip_cap().await {
            Ok(tip) => match self.escalator.recompute_default_fee(new_head.base_fee, tip) {
                Ok(proposal) => *self.fee_proposal.write().await = proposal,
                Err(e) => warn!(err = %e, "Failed to recompute the default fee"),
            },
            Err(e) => warn!(err = %e, "Failed to fetch the suggested tip"),
        }

        self.check_confirmations(new_head).await;
    }

    /// One confirmation pass over all entries. Errored entries belong to
    /// the resend tick; one entry's RPC failure never halts the pass.
    async fn check_confirmations(&self, head: ChainHead) {
        for id in self.registry.ids() {
            let Some(entry_arc) = self.registry.get(&id) else {
                continue;
            };
            let mut entry = entry_arc.lock().await;
            if entry.last_error.is_some() {
                continue;
            }
            let Some(hash) = entry.current_hash() else {
                continue;
            };

            if entry.receipt.is_none() {
                match self.rpc.transaction_by_hash(hash).await {
                    Err(e) => {
                        warn!(id = %id, hash = %hash, err = %e, "Failed to fetch transaction");
                        continue;
                    }
                    Ok(TxLookup::Pending) => {
                        entry.observed = true;
                        if entry.created_at.elapsed() > self.config.max_waiting_time {
                            // Superseded by a fee-bumped replacement at the
                            // same nonce on the next resend tick
                            warn!(id = %id, hash = %hash, "Transaction in mempool for too long");
                            entry.last_error = Some(SenderError::MempoolTimeout);
                        }
                        continue;
                    }
                    Ok(TxLookup::NotFound) => {
                        if entry.observed {
                            let outcome = TxOutcome::from_entry(&entry, TxResolution::NotFound);
                            drop(entry);
                            self.finish(&id, outcome);
                        }
                        continue;
                    }
                    Ok(TxLookup::Mined) => match self.rpc.transaction_receipt(hash).await {
                        Err(e) => {
                            warn!(hash = %hash, err = %e, "Failed to get the transaction receipt");
                            continue;
                        }
                        Ok(None) => {
                            warn!(hash = %hash, "Receipt not available yet");
                            continue;
                        }
                        Ok(Some(receipt)) => {
                            entry.observed = true;
                            metrics::record_inclusion(&receipt, entry.created_at.elapsed());
                            let success = receipt.success;
                            entry.receipt = Some(receipt);
                            if !success {
                                let outcome =
                                    TxOutcome::from_entry(&entry, TxResolution::Reverted);
                                drop(entry);
                                self.finish(&id, outcome);
                                continue;
                            }
                        }
                    },
                }
            }

            if let Some(receipt) = &entry.receipt {
                let confirmations = head.number.saturating_sub(receipt.block_number);
                if confirmations >= self.config.confirmation_depth {
                    let outcome = TxOutcome::from_entry(&entry, TxResolution::Confirmed);
                    drop(entry);
                    self.finish(&id, outcome);
                }
            }
        }
    }

    /// Resend tick: every errored entry gets its retry counter bumped,
    /// then is either released as exhausted or resent with a forced nonce
    /// resync. Timed-out transactions are escalated first; rebroadcasting
    /// them unchanged would only be answered with "already known".
    async fn resend_unconfirmed(&self) {
        for id in self.registry.ids() {
            let Some(entry_arc) = self.registry.get(&id) else {
                continue;
            };

            let mut exhausted = None;
            let mut resend = false;
            {
                let mut entry = entry_arc.lock().await;
                if let Some(err) = entry.last_error.clone() {
                    entry.retries += 1;
                    if self.config.max_retries != 0 && entry.retries >= self.config.max_retries {
                        exhausted =
                            Some(TxOutcome::from_entry(&entry, TxResolution::RetriesExhausted));
                    } else {
                        if err.is_mempool_timeout() {
                            if entry.tx_data.is_blob() {
                                self.escalator.adjust_blob_gas_fee(&mut entry.tx_data);
                            }
                            self.escalator.adjust_gas_fee(&mut entry.tx_data);
                        }
                        resend = true;
                    }
                }
            }

            if let Some(outcome) = exhausted {
                warn!(id = %id, retries = outcome.retries, "Retries exhausted");
                self.finish(&id, outcome);
                continue;
            }
            if !resend {
                continue;
            }

            match self.send(&id, true).await {
                Ok(()) => metrics::record_tx_resent(),
                Err(e) => {
                    let (nonce, retries) = {
                        let entry = entry_arc.lock().await;
                        (entry.tx_data.nonce(), entry.retries)
                    };
                    metrics::record_resend_failed();
                    warn!(id = %id, nonce, retries, err = %e, "Failed to resend the transaction");
                }
            }
        }
    }

    /// Push the terminal outcome and drop the entry
    fn finish(&self, id: &str, outcome: TxOutcome) {
        metrics::record_resolution(outcome.resolution);
        self.registry.release(id, outcome);
        metrics::set_pending(self.registry.len());
    }

    /// Stop the confirmation loop and wait for it to exit. Entries still
    /// pending are abandoned in memory; the chain remains the source of
    /// truth for them.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.sender_registry.release(self.chain_id, self.address);
        info!(address = %self.address, "Transaction sender closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockRpcClient, ReceiptInfo};
    use alloy::consensus::Transaction;
    use alloy::primitives::B256;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    const CHAIN_ID: u64 = 167_000;

    fn test_config() -> SenderConfig {
        SenderConfig {
            gas_limit: 21_000,
            max_waiting_time: Duration::from_secs(60),
            head_poll_interval: Duration::from_millis(50),
            resend_interval: Duration::from_millis(30),
            ..SenderConfig::default()
        }
    }

    /// Mock with the calls every sender construction performs
    fn base_mock(start_nonce: u64, base_fee: u128) -> MockRpcClient {
        let mut rpc = MockRpcClient::new();
        rpc.expect_chain_id().return_const(CHAIN_ID);
        rpc.expect_nonce_at().returning(move |_| Ok(start_nonce));
        rpc.expect_suggest_tip_cap().returning(|| Ok(2));

        let heads = AtomicU64::new(0);
        rpc.expect_latest_header().returning(move || {
            let i = heads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ChainHead {
                number: 100 + i,
                hash: B256::with_last_byte(i as u8),
                base_fee,
            })
        });
        rpc
    }

    async fn new_sender(rpc: MockRpcClient) -> Arc<TransactionSender> {
        new_sender_with_config(rpc, test_config()).await
    }

    async fn new_sender_with_config(
        rpc: MockRpcClient,
        config: SenderConfig,
    ) -> Arc<TransactionSender> {
        TransactionSender::new(
            config,
            Arc::new(rpc),
            PrivateKeySigner::random(),
            Arc::new(SenderRegistry::new()),
        )
        .await
        .unwrap()
    }

    fn transfer() -> (Option<Address>, U256, Bytes) {
        (Some(Address::ZERO), U256::from(1), Bytes::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_confirmed() {
        let mut rpc = base_mock(5, 10);
        rpc.expect_send_raw_transaction()
            .times(1)
            .returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Mined));
        rpc.expect_transaction_receipt().returning(|hash| {
            Ok(Some(ReceiptInfo {
                tx_hash: hash,
                block_number: 101,
                success: true,
                effective_gas_price: 12,
                blob_gas_price: None,
            }))
        });

        let sender = new_sender(rpc).await;
        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let rx = sender.take_outcome_channel(&id).unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.resolution, TxResolution::Confirmed);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.tx.unwrap().nonce(), 5);
        assert_eq!(outcome.receipt.unwrap().block_number, 101);
        assert_eq!(sender.pending_count(), 0);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_releases_immediately() {
        let mut rpc = base_mock(5, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Mined));
        rpc.expect_transaction_receipt().returning(|hash| {
            Ok(Some(ReceiptInfo {
                tx_hash: hash,
                block_number: 101,
                success: false,
                effective_gas_price: 12,
                blob_gas_price: None,
            }))
        });

        let sender = new_sender(rpc).await;
        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let rx = sender.take_outcome_channel(&id).unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.resolution, TxResolution::Reverted);
        assert!(matches!(outcome.error, Some(SenderError::Reverted { .. })));
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_depth_gates_release() {
        let mut rpc = base_mock(5, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Mined));
        rpc.expect_transaction_receipt().returning(|hash| {
            Ok(Some(ReceiptInfo {
                tx_hash: hash,
                block_number: 101,
                success: true,
                effective_gas_price: 12,
                blob_gas_price: None,
            }))
        });

        let config = SenderConfig {
            confirmation_depth: 3,
            ..test_config()
        };
        let sender = new_sender_with_config(rpc, config).await;
        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let mut rx = sender.take_outcome_channel(&id).unwrap();

        // Heads advance one block per 50ms poll; at 60ms at most head 103
        // has been seen, so confirmations < 3 and nothing is released
        sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sender.pending_count(), 1);

        // Released exactly once when the depth is reached
        sleep(Duration::from_millis(200)).await;
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.resolution, TxResolution::Confirmed);
        assert_eq!(sender.pending_count(), 0);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_submits_get_gapless_nonces() {
        let mut rpc = base_mock(10, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let sender = new_sender(rpc).await;
        let mut nonces = Vec::new();
        for _ in 0..3 {
            let (to, value, data) = transfer();
            let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
            nonces.push(sender.unconfirmed_tx(&id).await.unwrap().nonce());
        }
        assert_eq!(nonces, vec![10, 11, 12]);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submits_get_distinct_nonces() {
        let mut rpc = base_mock(10, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let sender = new_sender(rpc).await;
        let (a, b) = tokio::join!(
            sender.submit_raw(None, Some(Address::ZERO), U256::from(1), Bytes::new(), None),
            sender.submit_raw(None, Some(Address::ZERO), U256::from(1), Bytes::new(), None),
        );
        let mut nonces = vec![
            sender.unconfirmed_tx(&a.unwrap()).await.unwrap().nonce(),
            sender.unconfirmed_tx(&b.unwrap()).await.unwrap().nonce(),
        ];
        nonces.sort_unstable();
        assert_eq!(nonces, vec![10, 11]);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_rejection() {
        let mut rpc = base_mock(0, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let config = SenderConfig {
            max_pending_txs: 2,
            ..test_config()
        };
        let sender = new_sender_with_config(rpc, config).await;
        for _ in 0..2 {
            let (to, value, data) = transfer();
            sender.submit_raw(None, to, value, data, None).await.unwrap();
        }

        let (to, value, data) = transfer();
        let err = sender.submit_raw(None, to, value, data, None).await.unwrap_err();
        assert!(matches!(err, SenderError::TooManyPending));
        assert_eq!(sender.pending_count(), 2);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_underpriced_escalates_to_exact_bump() {
        // Proposal fee cap = tip 2 + 2*49 = 100; 50% growth bumps to 150
        let mut rpc = base_mock(0, 49);
        let calls = AtomicU64::new(0);
        rpc.expect_send_raw_transaction().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SenderError::Rpc(
                    "replacement transaction underpriced".to_string(),
                ))
            } else {
                Ok(B256::ZERO)
            }
        });
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let sender = new_sender(rpc).await;
        assert_eq!(sender.default_fee().await.max_fee_per_gas, 100);

        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let envelope = sender.unconfirmed_tx(&id).await.unwrap();
        assert_eq!(envelope.max_fee_per_gas(), 150);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_respects_max_gas_fee() {
        let mut rpc = base_mock(0, 49);
        let calls = AtomicU64::new(0);
        rpc.expect_send_raw_transaction().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SenderError::Rpc("transaction underpriced".to_string()))
            } else {
                Ok(B256::ZERO)
            }
        });
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let config = SenderConfig {
            max_gas_fee: 120,
            ..test_config()
        };
        let sender = new_sender_with_config(rpc, config).await;

        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let envelope = sender.unconfirmed_tx(&id).await.unwrap();
        assert_eq!(envelope.max_fee_per_gas(), 120);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonce_too_low_resyncs_and_retries() {
        let mut rpc = MockRpcClient::new();
        rpc.expect_chain_id().return_const(CHAIN_ID);
        rpc.expect_suggest_tip_cap().returning(|| Ok(2));
        let heads = AtomicU64::new(0);
        rpc.expect_latest_header().returning(move || {
            let i = heads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ChainHead {
                number: 100 + i,
                hash: B256::with_last_byte(i as u8),
                base_fee: 10,
            })
        });
        // First fetch (construction) says 5, the post-rejection resync says 9
        let nonce_calls = AtomicU64::new(0);
        rpc.expect_nonce_at().returning(move |_| {
            if nonce_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(5)
            } else {
                Ok(9)
            }
        });
        let send_calls = AtomicU64::new(0);
        rpc.expect_send_raw_transaction().returning(move |_| {
            if send_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SenderError::Rpc("nonce too low".to_string()))
            } else {
                Ok(B256::ZERO)
            }
        });
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let sender = new_sender(rpc).await;
        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        assert_eq!(sender.unconfirmed_tx(&id).await.unwrap().nonce(), 9);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mempool_timeout_resends_escalated_at_same_nonce() {
        let mut rpc = base_mock(7, 49);
        let send_calls = Arc::new(AtomicU64::new(0));
        let send_calls_clone = send_calls.clone();
        rpc.expect_send_raw_transaction().returning(move |_| {
            send_calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(B256::ZERO)
        });
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let config = SenderConfig {
            max_waiting_time: Duration::from_millis(10),
            ..test_config()
        };
        let sender = new_sender_with_config(rpc, config).await;
        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let fee_before = sender.unconfirmed_tx(&id).await.unwrap().max_fee_per_gas();

        // Head tick marks the timeout, the next resend tick replaces
        sleep(Duration::from_millis(200)).await;

        assert!(send_calls.load(Ordering::SeqCst) >= 2);
        let envelope = sender.unconfirmed_tx(&id).await.unwrap();
        // Same nonce, higher fee: replace-by-fee
        assert_eq!(envelope.nonce(), 7);
        assert!(envelope.max_fee_per_gas() > fee_before);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_releases() {
        let mut rpc = base_mock(0, 10);
        rpc.expect_send_raw_transaction().returning(|_| {
            Err(SenderError::Rpc(
                "replacement transaction underpriced".to_string(),
            ))
        });

        let config = SenderConfig {
            max_retries: 1,
            ..test_config()
        };
        let sender = new_sender_with_config(rpc, config).await;
        let (to, value, data) = transfer();
        // Recoverable rejection: the id is returned and the resend loop
        // owns the entry
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let rx = sender.take_outcome_channel(&id).unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.resolution, TxResolution::RetriesExhausted);
        assert!(matches!(
            outcome.error,
            Some(SenderError::RetriesExhausted { .. })
        ));
        assert_eq!(sender.pending_count(), 0);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_transaction_released_as_not_found() {
        let mut rpc = base_mock(0, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        // Seen pending once, then gone from the pool entirely
        let lookups = AtomicU64::new(0);
        rpc.expect_transaction_by_hash().returning(move |_| {
            if lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(TxLookup::Pending)
            } else {
                Ok(TxLookup::NotFound)
            }
        });

        let sender = new_sender(rpc).await;
        let (to, value, data) = transfer();
        let id = sender.submit_raw(None, to, value, data, None).await.unwrap();
        let rx = sender.take_outcome_channel(&id).unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.resolution, TxResolution::NotFound);
        assert!(matches!(outcome.error, Some(SenderError::NotFound)));
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_broadcast_error_removes_entry() {
        let mut rpc = base_mock(0, 10);
        rpc.expect_send_raw_transaction()
            .returning(|_| Err(SenderError::Signer("no key".to_string())));

        let sender = new_sender(rpc).await;
        let (to, value, data) = transfer();
        let err = sender.submit_raw(None, to, value, data, None).await.unwrap_err();
        assert!(matches!(err, SenderError::Signer(_)));
        assert_eq!(sender.pending_count(), 0);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_blob_submit_and_blob_fee_escalation() {
        let mut rpc = base_mock(0, 10);
        let calls = AtomicU64::new(0);
        rpc.expect_send_raw_transaction().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SenderError::Rpc(
                    "replacement transaction underpriced: new tx blob gas fee cap 1 <= 1 queued"
                        .to_string(),
                ))
            } else {
                Ok(B256::ZERO)
            }
        });
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let sender = new_sender(rpc).await;
        let id = sender
            .submit_raw(
                None,
                None,
                U256::ZERO,
                Bytes::new(),
                Some(BlobTransactionSidecar::default()),
            )
            .await
            .unwrap();

        let envelope = sender.unconfirmed_tx(&id).await.unwrap();
        // 50% growth on the 1 gwei starting cap
        assert_eq!(envelope.max_fee_per_blob_gas(), Some(1_500_000_000));
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_prebuilt_takes_fresh_nonce() {
        let mut rpc = base_mock(10, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        rpc.expect_transaction_by_hash()
            .returning(|_| Ok(TxLookup::Pending));

        let sender = new_sender(rpc).await;

        // A transaction signed elsewhere, carrying a stale nonce
        let signer = PrivateKeySigner::random();
        let stale = TxData::Eip1559(Eip1559Fields {
            chain_id: CHAIN_ID,
            nonce: 99,
            to: TxKind::Call(Address::ZERO),
            value: U256::from(1),
            input: Bytes::new(),
            gas_limit: 21_000,
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 2,
        });
        let (envelope, _) = sign_tx_data(&signer, &stale).unwrap();

        let id = sender.submit_prebuilt(&envelope).await.unwrap();
        assert_eq!(sender.unconfirmed_tx(&id).await.unwrap().nonce(), 10);
        sender.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_sender_registration_fails() {
        let registry = Arc::new(SenderRegistry::new());
        let signer = PrivateKeySigner::random();

        let mut rpc = base_mock(0, 10);
        rpc.expect_send_raw_transaction().returning(|_| Ok(B256::ZERO));
        let first = TransactionSender::new(
            test_config(),
            Arc::new(rpc),
            signer.clone(),
            registry.clone(),
        )
        .await
        .unwrap();

        let err = TransactionSender::new(
            test_config(),
            Arc::new(base_mock(0, 10)),
            signer.clone(),
            registry.clone(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SenderError::DuplicateSender { .. }));

        // Closing releases the slot
        first.close().await;
        let again = TransactionSender::new(
            test_config(),
            Arc::new(base_mock(0, 10)),
            signer,
            registry,
        )
        .await
        .unwrap();
        again.close().await;
    }
}
