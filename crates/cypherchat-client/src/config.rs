//! Client configuration loaded from environment variables.
//!
//! Everything except the contract address and the wallet endpoint has a
//! default. Call [`ClientConfig::validate`] before connecting.

use std::path::PathBuf;
use std::time::Duration;

use cypherchat_net::GatewayOptions;
use cypherchat_shared::constants::{
    DEFAULT_CONFIRMATIONS, DEFAULT_GAS_LIMIT, DEFAULT_MAX_POLL_BACKOFF_SECS, DEFAULT_PAGE_SIZE,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECEIPT_TIMEOUT_SECS, DEFAULT_RETRY_INTERVAL_SECS,
    DEFAULT_RETRY_MAX_ATTEMPTS, RECEIPT_POLL_INTERVAL_MS, SEPOLIA_PUBLIC_RPC_URL,
};
use cypherchat_shared::ChainAddress;

use crate::error::ClientError;
use crate::retry::RetryPolicy;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// JSON-RPC endpoint of the wallet that holds the user's keys.
    /// Env: `CYPHERCHAT_WALLET_URL`
    /// Default: none (connecting fails with "wallet unavailable").
    pub wallet_url: Option<String>,

    /// Address of the deployed chat contract.
    /// Env: `CYPHERCHAT_CONTRACT_ADDRESS`
    /// Default: none (required).
    pub contract_address: Option<ChainAddress>,

    /// Public RPC advertised to the wallet when it must add the chain.
    /// Env: `CYPHERCHAT_RPC_URL`
    pub public_rpc_url: String,

    /// Env: `CYPHERCHAT_DB_PATH`
    /// Default: the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Env: `CYPHERCHAT_POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// Confirmed messages fetched per page of history. Zero loads the whole
    /// conversation at once.
    /// Env: `CYPHERCHAT_PAGE_SIZE`
    pub page_size: usize,

    /// Upper bound for the poll delay after repeated failures.
    /// Env: `CYPHERCHAT_MAX_POLL_BACKOFF_SECS`
    pub max_poll_backoff: Duration,

    /// Env: `CYPHERCHAT_GAS_LIMIT`
    pub gas_limit: u64,

    /// Env: `CYPHERCHAT_RECEIPT_TIMEOUT_SECS`
    pub receipt_timeout: Duration,

    /// Env: `CYPHERCHAT_RETRY_MAX_ATTEMPTS`, `CYPHERCHAT_RETRY_INTERVAL_SECS`,
    /// `CYPHERCHAT_AUTO_RETRY`
    pub retry: RetryPolicy,

    /// Reconnect on start when a session marker is stored.
    /// Env: `CYPHERCHAT_AUTO_RECONNECT` (true/false)
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wallet_url: None,
            contract_address: None,
            public_rpc_url: SEPOLIA_PUBLIC_RPC_URL.to_string(),
            db_path: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            page_size: DEFAULT_PAGE_SIZE,
            max_poll_backoff: Duration::from_secs(DEFAULT_MAX_POLL_BACKOFF_SECS),
            gas_limit: DEFAULT_GAS_LIMIT,
            receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
            retry: RetryPolicy {
                enabled: true,
                max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            },
            auto_reconnect: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CYPHERCHAT_WALLET_URL").filter(|v| !v.trim().is_empty()) {
            config.wallet_url = Some(url.trim().to_string());
        }

        if let Some(raw) = lookup("CYPHERCHAT_CONTRACT_ADDRESS") {
            match ChainAddress::parse(raw.trim()) {
                Ok(address) => config.contract_address = Some(address),
                Err(e) => tracing::warn!(
                    value = %raw,
                    error = %e,
                    "Invalid CYPHERCHAT_CONTRACT_ADDRESS, ignoring"
                ),
            }
        }

        if let Some(url) = lookup("CYPHERCHAT_RPC_URL").filter(|v| !v.trim().is_empty()) {
            config.public_rpc_url = url;
        }

        if let Some(path) = lookup("CYPHERCHAT_DB_PATH").filter(|v| !v.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "CYPHERCHAT_POLL_INTERVAL_MS").filter(|ms| *ms > 0) {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(size) = parse_var::<usize>(&lookup, "CYPHERCHAT_PAGE_SIZE") {
            config.page_size = size;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "CYPHERCHAT_MAX_POLL_BACKOFF_SECS") {
            config.max_poll_backoff = Duration::from_secs(secs);
        }

        if let Some(gas) = parse_var::<u64>(&lookup, "CYPHERCHAT_GAS_LIMIT") {
            config.gas_limit = gas;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "CYPHERCHAT_RECEIPT_TIMEOUT_SECS") {
            config.receipt_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<u32>(&lookup, "CYPHERCHAT_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = n;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "CYPHERCHAT_RETRY_INTERVAL_SECS") {
            config.retry.interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("CYPHERCHAT_AUTO_RETRY") {
            config.retry.enabled = parse_flag(&val);
        }

        if let Some(val) = lookup("CYPHERCHAT_AUTO_RECONNECT") {
            config.auto_reconnect = parse_flag(&val);
        }

        // Poll backoff never drops below the base interval.
        if config.max_poll_backoff < config.poll_interval {
            config.max_poll_backoff = config.poll_interval;
        }

        config
    }

    /// Fails listing every missing required setting.
    pub fn validate(&self) -> Result<(), ClientError> {
        let mut missing = Vec::new();
        if self.contract_address.is_none() {
            missing.push("CYPHERCHAT_CONTRACT_ADDRESS");
        }
        if self.wallet_url.is_none() {
            missing.push("CYPHERCHAT_WALLET_URL");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            gas_limit: self.gas_limit,
            confirmations: DEFAULT_CONFIRMATIONS,
            receipt_poll_interval: Duration::from_millis(RECEIPT_POLL_INTERVAL_MS),
            receipt_timeout: self.receipt_timeout,
        }
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val != "false" && val != "0"
}
