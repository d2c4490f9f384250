//! Execution nonce handling for vault calls
//!
//! Handles:
//! - Fresh reads of the contract's `execNonce` counter before every envelope
//! - The per-function offset table mapping that counter onto the `_nonce`
//!   argument each mutating function expects
//!
//! Nothing is cached: any other signer's mined call advances the counter.

use crate::abi::{token_to_uint, ContractCallEncoder, Interface};
use crate::chain::VaultRpc;
use crate::error::{VaultError, VaultResult};

use ethers::types::Address;
use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

/// Mutating functions that carry a `_nonce` argument, with the offset applied
/// to the current `execNonce`. Every entry is explicit.
const DEFAULT_OFFSETS: &[(&str, u32)] = &[
    ("submitTx", 0),
    ("submitRawTx", 0),
    ("approveTx", 0),
    ("deleteTx", 0),
    ("newProposal", 0),
    ("approveProposal", 0),
    ("deleteProposal", 0),
    ("withdraw", 0),
    ("trackToken", 0),
];

/// Per-function execNonce convention
#[derive(Debug, Clone)]
pub struct NoncePolicy {
    offsets: HashMap<String, u32>,
}

impl NoncePolicy {
    /// Build the table, applying configured overrides on top of the defaults.
    /// Overrides for functions that take no nonce are rejected.
    pub fn new(overrides: &HashMap<String, u32>) -> VaultResult<Self> {
        let mut offsets: HashMap<String, u32> = DEFAULT_OFFSETS
            .iter()
            .map(|(name, offset)| (name.to_string(), *offset))
            .collect();

        for (function, offset) in overrides {
            match offsets.get_mut(function) {
                Some(slot) => {
                    debug!("Nonce offset for {} overridden to +{}", function, offset);
                    *slot = *offset;
                }
                None => {
                    return Err(VaultError::Config(format!(
                        "nonce_offsets names {}, which takes no execution nonce",
                        function
                    )))
                }
            }
        }

        Ok(Self { offsets })
    }

    pub fn offset(&self, function: &str) -> VaultResult<u32> {
        self.offsets
            .get(function)
            .copied()
            .ok_or_else(|| VaultError::NoncePolicy {
                function: function.to_string(),
            })
    }
}

impl Default for NoncePolicy {
    fn default() -> Self {
        Self {
            offsets: DEFAULT_OFFSETS
                .iter()
                .map(|(name, offset)| (name.to_string(), *offset))
                .collect(),
        }
    }
}

/// Derives the `_nonce` argument for vault calls
pub struct NonceCoordinator {
    policy: NoncePolicy,
}

impl NonceCoordinator {
    pub fn new(policy: NoncePolicy) -> Self {
        Self { policy }
    }

    /// Resolve the nonce `function` must carry, reading the current counter
    /// through `read_current` exactly once.
    pub async fn next_nonce<F, Fut>(&self, function: &str, read_current: F) -> VaultResult<u32>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VaultResult<u32>>,
    {
        // Check the table before touching the network
        let offset = self.policy.offset(function)?;
        let current = read_current().await?;

        let nonce = current
            .checked_add(offset)
            .ok_or_else(|| VaultError::InvalidArgument(format!(
                "execNonce {} + {} overflows uint32",
                current, offset
            )))?;

        debug!(
            "execNonce {} -> _nonce {} for {} (offset +{})",
            current, nonce, function, offset
        );
        Ok(nonce)
    }
}

/// Fresh `execNonce()` read from the vault
pub async fn read_exec_nonce(rpc: &dyn VaultRpc, vault: Address) -> VaultResult<u32> {
    // Both interfaces declare the same execNonce() view
    let encoder = ContractCallEncoder::new(Interface::Legacy);
    let data = encoder.encode("execNonce", &[])?;
    let raw = rpc.call(vault, data).await?;
    let tokens = encoder.decode_output("execNonce", &raw)?;
    let value = tokens
        .first()
        .map(token_to_uint)
        .transpose()?
        .ok_or_else(|| VaultError::Abi("execNonce returned no value".to_string()))?;

    if value.bits() > 32 {
        return Err(VaultError::Abi(format!("execNonce {} exceeds uint32", value)));
    }
    Ok(value.as_u32())
}
