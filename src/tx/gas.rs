//! Fee escalation for underpriced and stuck transactions

use crate::config::SenderConfig;
use crate::error::{SenderError, SenderResult};
use crate::tx::types::TxData;

use tracing::warn;

/// Default fee fields proposed for newly built transactions, refreshed on
/// every new head
#[derive(Debug, Clone, Copy, Default)]
pub struct FeeProposal {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Bumps fee, tip and blob-fee caps under the configured growth rate,
/// bounded by the configured hard caps
#[derive(Debug, Clone)]
pub struct FeeEscalator {
    /// Growth rate in percent, 50 means a 50% bump per escalation
    growth_rate: u64,
    max_gas_fee: u128,
    max_blob_fee: u128,
}

impl FeeEscalator {
    pub fn new(config: &SenderConfig) -> Self {
        Self {
            growth_rate: config.gas_growth_rate,
            max_gas_fee: config.max_gas_fee,
            max_blob_fee: config.max_blob_fee,
        }
    }

    fn bump(&self, value: u128) -> u128 {
        value.saturating_add(value.saturating_mul(self.growth_rate as u128) / 100)
    }

    /// Escalate the execution fee and tip caps.
    ///
    /// The tip cap is clamped to the new fee cap, never the reverse.
    pub fn adjust_gas_fee(&self, tx: &mut TxData) {
        let (fee, tip) = match tx {
            TxData::Eip1559(fields) => (
                &mut fields.max_fee_per_gas,
                &mut fields.max_priority_fee_per_gas,
            ),
            TxData::Blob(fields) => (
                &mut fields.max_fee_per_gas,
                &mut fields.max_priority_fee_per_gas,
            ),
        };

        let new_fee = self.bump(*fee).min(self.max_gas_fee);
        let new_tip = self.bump(*tip).min(self.max_gas_fee).min(new_fee);
        *fee = new_fee;
        *tip = new_tip;
    }

    /// Escalate the blob fee cap.
    ///
    /// The +1 floor guarantees a strict increase even when multiplicative
    /// growth rounds to zero.
    pub fn adjust_blob_gas_fee(&self, tx: &mut TxData) {
        let fields = match tx {
            TxData::Blob(fields) => fields,
            TxData::Eip1559(_) => {
                warn!("Blob fee escalation requested for a non-blob transaction");
                return;
            }
        };

        let rate = self.growth_rate as u128 + 100;
        let grown = fields.max_fee_per_blob_gas.saturating_mul(rate) / 100;
        fields.max_fee_per_blob_gas = grown
            .max(fields.max_fee_per_blob_gas.saturating_add(1))
            .min(self.max_blob_fee);
    }

    /// Recompute the default fee proposal from the head's base fee and the
    /// node-suggested tip
    pub fn recompute_default_fee(
        &self,
        base_fee: u128,
        suggested_tip: u128,
    ) -> SenderResult<FeeProposal> {
        let fee_cap = suggested_tip.saturating_add(base_fee.saturating_mul(2));
        if fee_cap < suggested_tip {
            return Err(SenderError::InconsistentFee {
                fee_cap,
                tip_cap: suggested_tip,
            });
        }

        let fee_cap = fee_cap.min(self.max_gas_fee);
        let tip_cap = suggested_tip.min(fee_cap);
        Ok(FeeProposal {
            max_fee_per_gas: fee_cap,
            max_priority_fee_per_gas: tip_cap,
        })
    }
}
