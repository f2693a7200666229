//! Nonce sequencing for serialized transaction submission
//!
//! The sequencer tracks the next nonce locally and increments it after
//! every successful broadcast, avoiding a round trip per transaction. A
//! "nonce too low" rejection forces a resync from chain before the retry.

use crate::chain::RpcClient;
use crate::error::SenderResult;

use alloy::primitives::Address;
use tracing::debug;

/// Tracks and assigns the next nonce for one signing address.
///
/// Lives inside the sender's send mutex, so access is already serialized.
#[derive(Debug)]
pub struct NonceSequencer {
    address: Address,
    /// Next nonce to assign; None until first synced from chain
    next: Option<u64>,
}

impl NonceSequencer {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            next: None,
        }
    }

    /// Next nonce to use. Fetches the chain-confirmed nonce when
    /// uninitialized or when a resync is forced, otherwise returns the
    /// held counter.
    pub async fn next(&mut self, rpc: &dyn RpcClient, force_resync: bool) -> SenderResult<u64> {
        if force_resync || self.next.is_none() {
            let nonce = rpc.nonce_at(self.address).await?;
            debug!(address = %self.address, nonce, "Synced nonce from chain");
            self.next = Some(nonce);
        }
        Ok(self.next.unwrap_or_default())
    }

    /// Advance the counter past a successfully broadcast nonce
    pub fn advance(&mut self) {
        if let Some(n) = self.next.as_mut() {
            *n += 1;
        }
    }

    pub fn current(&self) -> Option<u64> {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockRpcClient;

    #[tokio::test]
    async fn test_initial_sync_adopts_chain_nonce() {
        let mut rpc = MockRpcClient::new();
        rpc.expect_nonce_at().times(1).returning(|_| Ok(42));

        let mut seq = NonceSequencer::new(Address::ZERO);
        assert_eq!(seq.next(&rpc, false).await.unwrap(), 42);
        // Held counter, no second fetch
        assert_eq!(seq.next(&rpc, false).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_advance_is_local() {
        let mut rpc = MockRpcClient::new();
        rpc.expect_nonce_at().times(1).returning(|_| Ok(7));

        let mut seq = NonceSequencer::new(Address::ZERO);
        assert_eq!(seq.next(&rpc, false).await.unwrap(), 7);
        seq.advance();
        assert_eq!(seq.next(&rpc, false).await.unwrap(), 8);
        seq.advance();
        assert_eq!(seq.next(&rpc, false).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_forced_resync_refetches() {
        let mut rpc = MockRpcClient::new();
        let mut chain_nonce = 10;
        rpc.expect_nonce_at().times(2).returning(move |_| {
            chain_nonce += 5;
            Ok(chain_nonce)
        });

        let mut seq = NonceSequencer::new(Address::ZERO);
        assert_eq!(seq.next(&rpc, false).await.unwrap(), 15);
        seq.advance();
        seq.advance();
        // Chain says otherwise; the forced resync wins
        assert_eq!(seq.next(&rpc, true).await.unwrap(), 20);
    }
}
