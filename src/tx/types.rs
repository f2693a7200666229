//! Transaction shapes, pending entries and terminal outcomes

use crate::error::{SenderError, SenderResult};
use crate::chain::ReceiptInfo;

use alloy::consensus::{
    BlobTransactionSidecarVariant, SignableTransaction, Signed, TxEip1559, TxEip4844,
    TxEip4844Variant, TxEip4844WithSidecar, TxEnvelope,
};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::eip2930::AccessList;
use alloy::eips::eip4844::BlobTransactionSidecar;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use tokio::time::Instant;

/// Mutable pre-sign fields of an execution-fee transaction
#[derive(Debug, Clone)]
pub struct Eip1559Fields {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: TxKind,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Mutable pre-sign fields of a blob-carrying transaction
#[derive(Debug, Clone)]
pub struct BlobFields {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_blob_gas: u128,
    pub sidecar: BlobTransactionSidecar,
}

/// The transaction shapes the sender knows how to price and sign.
///
/// An explicit sum type instead of downcasting on envelope internals: the
/// escalator and the builder match exhaustively, so adding a shape is a
/// compile-time checked extension.
#[derive(Debug, Clone)]
pub enum TxData {
    Eip1559(Eip1559Fields),
    Blob(BlobFields),
}

impl TxData {
    pub fn nonce(&self) -> u64 {
        match self {
            TxData::Eip1559(tx) => tx.nonce,
            TxData::Blob(tx) => tx.nonce,
        }
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        match self {
            TxData::Eip1559(tx) => tx.nonce = nonce,
            TxData::Blob(tx) => tx.nonce = nonce,
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, TxData::Blob(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TxData::Eip1559(_) => "eip1559",
            TxData::Blob(_) => "blob",
        }
    }

    /// Decompose a signed envelope back into mutable pre-sign fields.
    ///
    /// Only the shapes the sender can re-price are accepted; legacy and
    /// access-list transactions are rejected rather than silently resent
    /// unescalatable.
    pub fn from_envelope(envelope: &TxEnvelope) -> SenderResult<TxData> {
        match envelope {
            TxEnvelope::Eip1559(signed) => {
                let tx = signed.tx();
                Ok(TxData::Eip1559(Eip1559Fields {
                    chain_id: tx.chain_id,
                    nonce: tx.nonce,
                    to: tx.to,
                    value: tx.value,
                    input: tx.input.clone(),
                    gas_limit: tx.gas_limit,
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
                }))
            }
            TxEnvelope::Eip4844(signed) => match signed.tx() {
                TxEip4844Variant::TxEip4844WithSidecar(tx) => {
                    let inner = tx.tx();
                    Ok(TxData::Blob(BlobFields {
                        chain_id: inner.chain_id,
                        nonce: inner.nonce,
                        to: inner.to,
                        value: inner.value,
                        input: inner.input.clone(),
                        gas_limit: inner.gas_limit,
                        max_fee_per_gas: inner.max_fee_per_gas,
                        max_priority_fee_per_gas: inner.max_priority_fee_per_gas,
                        max_fee_per_blob_gas: inner.max_fee_per_blob_gas,
                        sidecar: tx.sidecar().as_eip4844().cloned().ok_or_else(|| {
                            SenderError::UnsupportedTx(
                                "eip-7594 blob sidecar is not supported".to_string(),
                            )
                        })?,
                    }))
                }
                TxEip4844Variant::TxEip4844(_) => Err(SenderError::UnsupportedTx(
                    "blob transaction without sidecar".to_string(),
                )),
            },
            _ => Err(SenderError::UnsupportedTx(
                "only eip1559 and blob transactions can be resent".to_string(),
            )),
        }
    }
}

/// Sign the pre-sign fields and produce the envelope plus its network
/// encoding (the blob sidecar rides in the wrapper for mempool submission)
pub fn sign_tx_data(
    signer: &PrivateKeySigner,
    data: &TxData,
) -> SenderResult<(TxEnvelope, Bytes)> {
    let envelope = match data {
        TxData::Eip1559(fields) => {
            let mut tx = TxEip1559 {
                chain_id: fields.chain_id,
                nonce: fields.nonce,
                gas_limit: fields.gas_limit,
                max_fee_per_gas: fields.max_fee_per_gas,
                max_priority_fee_per_gas: fields.max_priority_fee_per_gas,
                to: fields.to,
                value: fields.value,
                access_list: AccessList::default(),
                input: fields.input.clone(),
            };
            let sig = signer
                .sign_transaction_sync(&mut tx)
                .map_err(|e| SenderError::Signer(e.to_string()))?;
            TxEnvelope::Eip1559(tx.into_signed(sig))
        }
        TxData::Blob(fields) => {
            let tx = TxEip4844 {
                chain_id: fields.chain_id,
                nonce: fields.nonce,
                gas_limit: fields.gas_limit,
                max_fee_per_gas: fields.max_fee_per_gas,
                max_priority_fee_per_gas: fields.max_priority_fee_per_gas,
                to: fields.to,
                value: fields.value,
                access_list: AccessList::default(),
                blob_versioned_hashes: fields.sidecar.versioned_hashes().collect(),
                max_fee_per_blob_gas: fields.max_fee_per_blob_gas,
                input: fields.input.clone(),
            };
            let mut with_sidecar =
                TxEip4844WithSidecar::from_tx_and_sidecar(tx, fields.sidecar.clone());
            let sig = signer
                .sign_transaction_sync(&mut with_sidecar)
                .map_err(|e| SenderError::Signer(e.to_string()))?;
            let (signed_tx, sig, hash) = with_sidecar.into_signed(sig).into_parts();
            TxEnvelope::Eip4844(Signed::new_unchecked(
                TxEip4844Variant::TxEip4844WithSidecar(
                    signed_tx.map_sidecar(BlobTransactionSidecarVariant::Eip4844),
                ),
                sig,
                hash,
            ))
        }
    };

    let raw = Bytes::from(envelope.encoded_2718());
    Ok((envelope, raw))
}

/// A transaction waiting for its confirmation
#[derive(Debug)]
pub struct PendingTx {
    pub id: String,
    /// Mutable pre-sign fields; resends re-sign from here
    pub tx_data: TxData,
    /// Most recently signed and broadcast envelope
    pub current: Option<TxEnvelope>,
    pub retries: u64,
    pub receipt: Option<ReceiptInfo>,
    pub created_at: Instant,
    pub last_error: Option<SenderError>,
    /// The pool has reported this hash at least once
    pub observed: bool,
    /// Take the nonce from the sequencer under the send lock before the
    /// first broadcast
    pub fresh_nonce: bool,
}

impl PendingTx {
    pub fn new(id: String, tx_data: TxData, fresh_nonce: bool) -> Self {
        Self {
            id,
            tx_data,
            current: None,
            retries: 0,
            receipt: None,
            created_at: Instant::now(),
            last_error: None,
            observed: false,
            fresh_nonce,
        }
    }

    /// Hash of the most recently broadcast envelope
    pub fn current_hash(&self) -> Option<B256> {
        self.current.as_ref().map(|e| *e.tx_hash())
    }
}

/// How a pending transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxResolution {
    Confirmed,
    Reverted,
    NotFound,
    RetriesExhausted,
}

/// Terminal result delivered on the completion channel
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub id: String,
    pub resolution: TxResolution,
    /// The envelope that reached the terminal state
    pub tx: Option<TxEnvelope>,
    pub receipt: Option<ReceiptInfo>,
    pub error: Option<SenderError>,
    pub retries: u64,
}

impl TxOutcome {
    pub(crate) fn from_entry(entry: &PendingTx, resolution: TxResolution) -> Self {
        let error = match resolution {
            TxResolution::Confirmed => None,
            TxResolution::Reverted => Some(SenderError::Reverted {
                tx_hash: entry
                    .current_hash()
                    .map(|h| h.to_string())
                    .unwrap_or_default(),
            }),
            TxResolution::NotFound => Some(SenderError::NotFound),
            TxResolution::RetriesExhausted => Some(SenderError::RetriesExhausted {
                retries: entry.retries,
            }),
        };
        Self {
            id: entry.id.clone(),
            resolution,
            tx: entry.current.clone(),
            receipt: entry.receipt.clone(),
            error,
            retries: entry.retries,
        }
    }
}
