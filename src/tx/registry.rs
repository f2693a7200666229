//! Concurrent store of in-flight transactions with capacity admission
//!
//! Each entry carries a one-shot completion channel. Releasing an entry
//! pushes the terminal outcome (non-blocking, dropped if unread) and
//! removes the id from all maps; the registry never queues past its cap,
//! it rejects.

use crate::error::{SenderError, SenderResult};
use crate::tx::types::{PendingTx, TxData, TxOutcome};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

struct CompletionSlot {
    sender: Option<oneshot::Sender<TxOutcome>>,
    receiver: Option<oneshot::Receiver<TxOutcome>>,
}

/// Registry of unconfirmed transactions keyed by id
pub struct PendingTransactionRegistry {
    /// Admission cap: submissions beyond it are rejected synchronously
    cap: usize,
    entries: DashMap<String, Arc<Mutex<PendingTx>>>,
    completions: DashMap<String, CompletionSlot>,
}

impl PendingTransactionRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: DashMap::new(),
            completions: DashMap::new(),
        }
    }

    /// Admit a new transaction: allocate an id, store the entry and create
    /// its completion channel. Fails with `TooManyPending` at the cap; no
    /// entry is created on failure.
    pub fn submit(&self, tx_data: TxData, fresh_nonce: bool) -> SenderResult<String> {
        if self.entries.len() >= self.cap {
            return Err(SenderError::TooManyPending);
        }

        let id = Uuid::new_v4().to_string();
        let entry = PendingTx::new(id.clone(), tx_data, fresh_nonce);
        let (tx, rx) = oneshot::channel();

        self.entries.insert(id.clone(), Arc::new(Mutex::new(entry)));
        self.completions.insert(
            id.clone(),
            CompletionSlot {
                sender: Some(tx),
                receiver: Some(rx),
            },
        );

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<PendingTx>>> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of the currently registered ids; safe to iterate while
    /// entries are inserted or released concurrently
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand out the completion receiver for an id. Each id has exactly one
    /// receiver; a second call returns None. An outcome released before
    /// the receiver is taken stays buffered in the channel.
    pub fn take_receiver(&self, id: &str) -> Option<oneshot::Receiver<TxOutcome>> {
        let (rx, emptied) = {
            let mut slot = self.completions.get_mut(id)?;
            let rx = slot.receiver.take();
            (rx, slot.sender.is_none())
        };
        if emptied {
            self.completions.remove(id);
        }
        rx
    }

    /// Push the terminal outcome into the completion channel (dropped if
    /// the caller is gone) and remove the entry. Releasing an absent id is
    /// a no-op.
    pub fn release(&self, id: &str, outcome: TxOutcome) {
        let emptied = match self.completions.get_mut(id) {
            Some(mut slot) => {
                if let Some(sender) = slot.sender.take() {
                    // Non-blocking; buffered until the receiver is awaited
                    let _ = sender.send(outcome);
                }
                slot.receiver.is_none()
            }
            None => false,
        };
        if emptied {
            self.completions.remove(id);
        }
        if self.entries.remove(id).is_some() {
            debug!(id, "Released pending transaction");
        }
    }

    /// Drop an entry without an outcome (a submission that never made it
    /// past its first send)
    pub fn remove(&self, id: &str) {
        self.entries.remove(id);
        self.completions.remove(id);
    }
}
