//! Vault protocol layer
//!
//! Maps user intents onto the concrete contract calls of the deployed vault
//! version. The version is read live at the start of every top-level action and
//! turned into a [`VaultProtocol`] implementation that is passed explicitly to
//! the transaction builder.

pub mod dispatcher;
pub mod protocol;
pub mod token;
pub mod views;

pub use dispatcher::{ContractVersion, VersionDispatcher};
pub use protocol::{LegacyProtocol, V2Protocol};

use crate::abi::Interface;
use crate::chain::VaultRpc;
use crate::error::VaultResult;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, U256};

/// A user-level request against the vault
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Send ether into the vault; `amount` in ether
    Deposit { amount: String },
    /// Propose an ether transfer out of the vault; `amount` in ether
    WithdrawEther { dest: Address, amount: String },
    /// Propose an ERC-20 transfer out of the vault; `amount` in token units
    WithdrawToken {
        token: Address,
        dest: Address,
        amount: String,
    },
    /// Delete a pending raw transaction
    CancelTransfer { txid: u32 },
    /// Approve a pending raw transaction
    ConfirmTransfer { txid: u32 },
    /// Propose a signer, limit and threshold change; `limit` in base units
    NewProposal {
        signer: Address,
        limit: U256,
        threshold: u8,
        paused: bool,
    },
    ApproveProposal { proposal_id: u16 },
    RevokeProposal { proposal_id: u16 },
    /// Start tracking an ERC-20 with its price oracle
    TrackToken { token: Address, price_feed: Address },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Deposit { .. } => "deposit",
            Intent::WithdrawEther { .. } => "withdraw ether",
            Intent::WithdrawToken { .. } => "withdraw token",
            Intent::CancelTransfer { .. } => "cancel transfer",
            Intent::ConfirmTransfer { .. } => "confirm transfer",
            Intent::NewProposal { .. } => "new proposal",
            Intent::ApproveProposal { .. } => "approve proposal",
            Intent::RevokeProposal { .. } => "revoke proposal",
            Intent::TrackToken { .. } => "track token",
        }
    }
}

/// What the builder has to send for an intent
#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    /// Mutating vault function; the builder appends the `_nonce` argument
    Vault {
        function: &'static str,
        args: Vec<Token>,
    },
    /// Plain ether transfer into the vault's receive hook
    Deposit { value: U256 },
}

/// Balance the vault must hold before the call is worth simulating
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceRequirement {
    VaultEther(U256),
    VaultToken { token: Address, amount: U256 },
}

/// A resolved intent
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    pub intent: &'static str,
    pub kind: CallKind,
    pub requirement: Option<BalanceRequirement>,
}

impl CallPlan {
    pub fn vault(intent: &Intent, function: &'static str, args: Vec<Token>) -> Self {
        Self {
            intent: intent.name(),
            kind: CallKind::Vault { function, args },
            requirement: None,
        }
    }

    pub fn requiring(mut self, requirement: BalanceRequirement) -> Self {
        self.requirement = Some(requirement);
        self
    }
}

/// One vault call convention
#[async_trait]
pub trait VaultProtocol: Send + Sync {
    fn version(&self) -> ContractVersion;

    /// Interface description call data is encoded against
    fn interface(&self) -> Interface;

    /// Resolve an intent into a concrete call. May read token metadata.
    async fn plan(&self, intent: &Intent, rpc: &dyn VaultRpc) -> VaultResult<CallPlan>;
}
