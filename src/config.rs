//! Configuration management for the EtherVault client
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::tx::{NoncePolicy, PriorityTier};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub client: ClientConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    pub wallet: WalletConfig,
    pub networks: HashMap<String, NetworkConfig>,
    /// Per-function execNonce offset overrides, e.g. `approveTx = 1`
    #[serde(default)]
    pub nonce_offsets: HashMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub default_network: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_priority")]
    pub default_priority: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub block_count: u64,
    pub reward_percentiles: [f64; 3],
    pub gas_limit_buffer_percent: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            block_count: 5,
            reward_percentiles: [10.0, 20.0, 30.0],
            gas_limit_buffer_percent: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub keystore_path: Option<String>,
    pub password_env: Option<String>,
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub vault_address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_rpc_timeout_ms() -> u64 {
    15_000
}

fn default_priority() -> String {
    "medium".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Settings {
    /// Load settings from `ETHERVAULT_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ETHERVAULT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if !self.networks.contains_key(&self.client.default_network) {
            anyhow::bail!(
                "Default network {} is not configured",
                self.client.default_network
            );
        }

        PriorityTier::from_str(&self.client.default_priority)?;

        for (name, network) in self.networks.iter().filter(|(_, n)| n.enabled) {
            if network.rpc_url.is_empty() {
                anyhow::bail!("Network {} has no RPC URL configured", name);
            }
            Address::from_str(&network.vault_address)
                .with_context(|| format!("Network {} has an invalid vault address", name))?;
        }

        NoncePolicy::new(&self.nonce_offsets)?;

        if self.fees.block_count == 0 {
            anyhow::bail!("fees.block_count must be at least 1");
        }

        if self.wallet.keystore_path.is_none() && self.wallet.private_key_env.is_none() {
            tracing::warn!("No wallet source configured - only read-only commands will work");
        }

        Ok(())
    }

    /// Get an enabled network by name
    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        let network = self
            .networks
            .get(name)
            .with_context(|| format!("Network {} not found in configuration", name))?;
        if !network.enabled {
            anyhow::bail!("Network {} is disabled", name);
        }
        Ok(network)
    }
}

impl NetworkConfig {
    /// Parsed vault contract address
    pub fn vault(&self) -> Result<Address> {
        Address::from_str(&self.vault_address)
            .with_context(|| format!("Invalid vault address: {}", self.vault_address))
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
