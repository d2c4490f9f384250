//! Live contract version detection

use super::{LegacyProtocol, V2Protocol, VaultProtocol};
use crate::abi::{token_to_uint, ContractCallEncoder, Interface};
use crate::chain::VaultRpc;
use crate::error::{VaultError, VaultResult};

use ethers::types::{Address, U256};
use std::fmt;
use tracing::{debug, info};

/// Deployed vault generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractVersion {
    /// Raw submit/approve/delete transaction flow
    Legacy,
    /// Direct withdraw and ERC-20 token tracking
    V2,
}

impl ContractVersion {
    pub fn number(&self) -> u64 {
        match self {
            ContractVersion::Legacy => 1,
            ContractVersion::V2 => 2,
        }
    }

    /// Interface description deployed at this version
    pub fn interface(&self) -> Interface {
        match self {
            ContractVersion::Legacy => Interface::Legacy,
            ContractVersion::V2 => Interface::V2,
        }
    }
}

impl TryFrom<U256> for ContractVersion {
    type Error = VaultError;

    fn try_from(value: U256) -> Result<Self, Self::Error> {
        if value == U256::from(1) {
            Ok(ContractVersion::Legacy)
        } else if value == U256::from(2) {
            Ok(ContractVersion::V2)
        } else {
            Err(VaultError::UnsupportedVersion(value.low_u64()))
        }
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Selects the protocol implementation for the vault as deployed right now
pub struct VersionDispatcher;

impl VersionDispatcher {
    /// Read `version()` from the vault
    ///
    /// Legacy vaults have no `version()` and revert on the call. Only a revert
    /// resolves to legacy; an unreachable or slow node is still an error.
    pub async fn read_version(rpc: &dyn VaultRpc, vault: Address) -> VaultResult<ContractVersion> {
        let encoder = ContractCallEncoder::new(Interface::V2);
        let raw = match rpc.call(vault, encoder.encode("version", &[])?).await {
            Ok(raw) => raw,
            Err(VaultError::SimulationReverted { reason, .. }) => {
                debug!("version() reverted ({}), treating vault as legacy", reason);
                return Ok(ContractVersion::Legacy);
            }
            Err(e) => return Err(e),
        };
        let tokens = encoder.decode_output("version", &raw)?;
        let value = tokens
            .first()
            .map(token_to_uint)
            .transpose()?
            .ok_or_else(|| VaultError::Abi("version returned no value".to_string()))?;

        ContractVersion::try_from(value)
    }

    /// Resolve the protocol for one top-level action. Never cached.
    pub async fn resolve(rpc: &dyn VaultRpc, vault: Address) -> VaultResult<Box<dyn VaultProtocol>> {
        let version = Self::read_version(rpc, vault).await?;
        info!("Vault {:?} reports contract version {}", vault, version);

        Ok(match version {
            ContractVersion::Legacy => Box::new(LegacyProtocol),
            ContractVersion::V2 => Box::new(V2Protocol),
        })
    }
}
