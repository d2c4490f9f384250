//! Chain module - the JSON-RPC surface the vault client consumes
//!
//! This module provides:
//! - The [`VaultRpc`] seam every builder and dispatcher talks through
//! - An ethers-backed [`ChainProvider`] with per-call timeouts
//! - Plain data types for call simulation and fee history snapshots

pub mod provider;

pub use provider::ChainProvider;

use crate::error::VaultResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

/// A call as it would be executed against the node
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// Human readable label used in error messages, usually the function name
    pub label: String,
}

/// Snapshot of `eth_feeHistory`
///
/// `base_fee_per_gas` runs oldest to newest and holds one more entry than
/// there are sampled blocks. `reward` holds one (low, medium, high) triple per
/// sampled block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeHistorySample {
    pub base_fee_per_gas: Vec<U256>,
    pub reward: Vec<[U256; 3]>,
}

/// Read and submit operations against a single chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VaultRpc: Send + Sync {
    /// `eth_chainId`
    async fn chain_id(&self) -> VaultResult<u64>;

    /// `eth_feeHistory` over the latest `block_count` blocks
    async fn fee_history(
        &self,
        block_count: u64,
        reward_percentiles: [f64; 3],
    ) -> VaultResult<FeeHistorySample>;

    /// `eth_estimateGas`; a revert surfaces as `SimulationReverted`
    async fn estimate_gas(&self, request: CallRequest) -> VaultResult<U256>;

    /// `eth_getTransactionCount` at the pending block
    async fn transaction_count(&self, account: Address) -> VaultResult<U256>;

    /// `eth_getBalance` at the latest block
    async fn balance(&self, account: Address) -> VaultResult<U256>;

    /// `eth_call` of a view function
    async fn call(&self, to: Address, data: Bytes) -> VaultResult<Bytes>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: Bytes) -> VaultResult<H256>;
}
