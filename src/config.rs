//! Configuration management for the transaction sender
//!
//! Loads settings from TOML files with environment variable substitution,
//! then narrows them to the immutable tunables the sender runs with.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub rpc: RpcSettings,
    pub wallet: WalletSettings,
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub sender: SenderSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletSettings {
    /// Name of the environment variable holding the signer's private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

/// Raw sender tunables as they appear in the config file.
///
/// Fee caps are in gwei because TOML integers cannot carry the unbounded
/// default; an absent cap means unbounded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SenderSettings {
    pub confirmation_depth: Option<u64>,
    pub max_retries: Option<u64>,
    pub max_waiting_time_secs: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_growth_rate: Option<u64>,
    pub max_gas_fee_gwei: Option<u64>,
    pub max_blob_fee_gwei: Option<u64>,
    pub max_pending_txs: Option<usize>,
    pub head_poll_interval_secs: Option<u64>,
    pub resend_interval_secs: Option<u64>,
}

const GWEI: u128 = 1_000_000_000;

impl SenderSettings {
    /// Narrow the raw file settings into the typed sender configuration
    pub fn to_config(&self) -> SenderConfig {
        let d = SenderConfig::default();
        SenderConfig {
            confirmation_depth: self.confirmation_depth.unwrap_or(d.confirmation_depth),
            max_retries: self.max_retries.unwrap_or(d.max_retries),
            max_waiting_time: self
                .max_waiting_time_secs
                .map(Duration::from_secs)
                .unwrap_or(d.max_waiting_time),
            gas_limit: self.gas_limit.unwrap_or(d.gas_limit),
            gas_growth_rate: self.gas_growth_rate.unwrap_or(d.gas_growth_rate),
            max_gas_fee: self
                .max_gas_fee_gwei
                .map(|g| g as u128 * GWEI)
                .unwrap_or(d.max_gas_fee),
            max_blob_fee: self
                .max_blob_fee_gwei
                .map(|g| g as u128 * GWEI)
                .unwrap_or(d.max_blob_fee),
            max_pending_txs: self.max_pending_txs.unwrap_or(d.max_pending_txs),
            head_poll_interval: self
                .head_poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(d.head_poll_interval),
            resend_interval: self
                .resend_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(d.resend_interval),
        }
    }
}

/// Immutable tunables of a running sender
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// The minimum block confirmations to wait before a transaction counts
    /// as confirmed
    pub confirmation_depth: u64,
    /// The maximum resend attempts per transaction, 0 means unbounded
    pub max_retries: u64,
    /// The maximum time a transaction may sit in the mempool before it is
    /// replaced by a fee-bumped transaction at the same nonce
    pub max_waiting_time: Duration,
    /// The gas limit for transactions, 0 means estimate per transaction
    pub gas_limit: u64,
    /// The fee growth rate in percent, 50 means a 50% bump per escalation
    pub gas_growth_rate: u64,
    /// The maximum execution fee cap in wei
    pub max_gas_fee: u128,
    /// The maximum blob fee cap in wei
    pub max_blob_fee: u128,
    /// The maximum number of concurrent unconfirmed transactions
    pub max_pending_txs: usize,
    /// How often the latest header is polled
    pub head_poll_interval: Duration,
    /// How often errored transactions are resent
    pub resend_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 0,
            max_retries: 0,
            max_waiting_time: Duration::from_secs(5 * 60),
            gas_limit: 0,
            gas_growth_rate: 50,
            max_gas_fee: u128::MAX,
            max_blob_fee: u128::MAX,
            max_pending_txs: 100,
            head_poll_interval: Duration::from_secs(3),
            resend_interval: Duration::from_secs(2),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("L2_SENDER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.rpc.endpoints.is_empty() {
            anyhow::bail!("At least one RPC endpoint must be configured");
        }
        if self.wallet.private_key_env.is_empty() {
            anyhow::bail!("wallet.private_key_env must name an environment variable");
        }

        let cfg = self.sender.to_config();
        if cfg.head_poll_interval.is_zero() || cfg.resend_interval.is_zero() {
            anyhow::bail!("Poll intervals must be nonzero");
        }
        if cfg.max_pending_txs == 0 {
            anyhow::bail!("max_pending_txs must be nonzero");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
