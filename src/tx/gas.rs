//! EIP-1559 fee estimation from recent fee history
//!
//! Each tier takes the latest base fee and the median of one reward percentile
//! column, scales both, and clamps the priority fee to a floor so quiet chains
//! do not produce transactions that never get picked up.

use crate::chain::{FeeHistorySample, VaultRpc};
use crate::config::FeeConfig;
use crate::error::{VaultError, VaultResult};

use ethers::types::U256;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Multipliers are expressed in basis points
const BPS: u64 = 10_000;

/// Safety margin applied to the total fee, in basis points
const TOTAL_FEE_MARGIN_BPS: u64 = 10_100;

const POLYGON_PRIORITY_FACTOR: u64 = 5;
const POLYGON_MAX_FEE_FACTOR: u64 = 3;

/// Fee aggressiveness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Low,
    Medium,
    High,
    /// High tier with Polygon's fee market correction
    Polygon,
}

impl PriorityTier {
    pub const ALL: [PriorityTier; 4] = [
        PriorityTier::Low,
        PriorityTier::Medium,
        PriorityTier::High,
        PriorityTier::Polygon,
    ];

    fn params(&self) -> TierParams {
        match self {
            PriorityTier::Low => TierParams {
                column: 0,
                base_fee_bps: 11_000,
                priority_fee_bps: 9_400,
                min_priority_fee: 100_000_000,
            },
            PriorityTier::Medium => TierParams {
                column: 1,
                base_fee_bps: 12_000,
                priority_fee_bps: 9_700,
                min_priority_fee: 150_000_000,
            },
            PriorityTier::High | PriorityTier::Polygon => TierParams {
                column: 2,
                base_fee_bps: 12_500,
                priority_fee_bps: 9_800,
                min_priority_fee: 200_000_000,
            },
        }
    }

    /// Minimum priority fee in wei this tier will ever quote
    pub fn floor(&self) -> U256 {
        let floor = U256::from(self.params().min_priority_fee);
        match self {
            PriorityTier::Polygon => floor * POLYGON_PRIORITY_FACTOR,
            _ => floor,
        }
    }
}

impl FromStr for PriorityTier {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(PriorityTier::Low),
            "medium" => Ok(PriorityTier::Medium),
            "high" => Ok(PriorityTier::High),
            "polygon" => Ok(PriorityTier::Polygon),
            _ => Err(VaultError::InvalidPriorityTier(s.to_string())),
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityTier::Low => "low",
            PriorityTier::Medium => "medium",
            PriorityTier::High => "high",
            PriorityTier::Polygon => "polygon",
        };
        f.write_str(name)
    }
}

struct TierParams {
    /// Reward percentile column
    column: usize,
    base_fee_bps: u64,
    priority_fee_bps: u64,
    min_priority_fee: u64,
}

/// Fee quote for a single transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub priority_tier: PriorityTier,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub estimated_gas_used: U256,
    /// `max_fee_per_gas * estimated_gas_used` plus a 1% margin
    pub estimated_total_fee_wei: U256,
}

/// Fee estimator for EIP-1559 transactions
pub struct FeeEstimator {
    block_count: u64,
    reward_percentiles: [f64; 3],
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
}

impl FeeEstimator {
    /// Create a new fee estimator
    pub fn new(config: &FeeConfig) -> Self {
        Self {
            block_count: config.block_count,
            reward_percentiles: config.reward_percentiles,
            gas_limit_buffer_percent: config.gas_limit_buffer_percent,
        }
    }

    /// Compute the quote for one tier from a fee history snapshot
    pub fn estimate(
        history: &FeeHistorySample,
        tier: PriorityTier,
        estimated_gas_used: U256,
    ) -> VaultResult<FeeQuote> {
        let base_fee = *history.base_fee_per_gas.last().ok_or_else(|| {
            VaultError::RpcUnavailable {
                operation: "eth_feeHistory".to_string(),
                message: "fee history has no base fee".to_string(),
            }
        })?;

        let params = tier.params();
        let column: Vec<U256> = history.reward.iter().map(|r| r[params.column]).collect();
        let median_reward = median(column).ok_or_else(|| VaultError::RpcUnavailable {
            operation: "eth_feeHistory".to_string(),
            message: "fee history has no reward samples".to_string(),
        })?;

        let adjusted_base_fee = base_fee * params.base_fee_bps / BPS;
        let dampened = median_reward * params.priority_fee_bps / BPS;
        let priority_fee = dampened.max(U256::from(params.min_priority_fee));

        let mut max_fee = adjusted_base_fee + priority_fee;
        let mut max_priority = priority_fee;
        if tier == PriorityTier::Polygon {
            max_priority = priority_fee * POLYGON_PRIORITY_FACTOR;
            max_fee = max_fee * POLYGON_MAX_FEE_FACTOR;
        }
        // A node rejects a tip above the fee cap
        let max_fee = max_fee.max(max_priority);

        let estimated_total_fee_wei =
            max_fee * estimated_gas_used * TOTAL_FEE_MARGIN_BPS / BPS;

        Ok(FeeQuote {
            priority_tier: tier,
            max_priority_fee_per_gas: max_priority,
            max_fee_per_gas: max_fee,
            estimated_gas_used,
            estimated_total_fee_wei,
        })
    }

    /// Quotes for every tier from one snapshot
    pub fn fee_table(
        history: &FeeHistorySample,
        estimated_gas_used: U256,
    ) -> VaultResult<Vec<FeeQuote>> {
        PriorityTier::ALL
            .iter()
            .map(|tier| Self::estimate(history, *tier, estimated_gas_used))
            .collect()
    }

    /// Fetch fresh fee history and quote the requested tier
    pub async fn quote(
        &self,
        rpc: &dyn VaultRpc,
        tier: PriorityTier,
        estimated_gas_used: U256,
    ) -> VaultResult<FeeQuote> {
        let history = rpc
            .fee_history(self.block_count, self.reward_percentiles)
            .await?;

        for q in Self::fee_table(&history, estimated_gas_used)? {
            debug!(
                "Tier {}: max priority fee {} wei, max fee {} wei, total {} wei",
                q.priority_tier, q.max_priority_fee_per_gas, q.max_fee_per_gas, q.estimated_total_fee_wei
            );
        }

        Self::estimate(&history, tier, estimated_gas_used)
    }

    /// Gas limit to put on the envelope for a simulated usage
    pub fn gas_limit(&self, estimated_gas_used: U256) -> U256 {
        let buffer = estimated_gas_used * self.gas_limit_buffer_percent / 100;
        estimated_gas_used + buffer
    }
}

/// Median of the samples; the mean of the middle pair for even counts
fn median(mut values: Vec<U256>) -> Option<U256> {
    if values.is_empty() {
        return None;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2)
    }
}
