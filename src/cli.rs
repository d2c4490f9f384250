//! Command line interface

use crate::error::{VaultError, VaultResult};
use crate::vault::token::ETHER_DECIMALS;
use crate::vault::Intent;

use clap::{Parser, Subcommand};
use ethers::types::{Address, U256};
use ethers::utils::{parse_units, ParseUnits};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "ethervault")]
#[command(about = "Client for EtherVault multisig contracts", version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ETHERVAULT_CONFIG or config/default.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Network name from the configuration
    #[arg(short, long, global = true)]
    pub network: Option<String>,

    /// Fee tier: low, medium, high or polygon
    #[arg(short, long, global = true)]
    pub priority: Option<String>,

    /// Build and print the transaction without broadcasting it
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "ETHERVAULT_JSON_LOGS")]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send ether into the vault
    Deposit {
        /// Amount in ether
        #[arg(long)]
        amount: String,
    },

    /// Withdraw ether from the vault
    Withdraw {
        #[arg(long, value_parser = parse_address)]
        to: Address,
        /// Amount in ether
        #[arg(long)]
        amount: String,
    },

    /// Withdraw an ERC-20 token from the vault
    WithdrawToken {
        #[arg(long, value_parser = parse_address)]
        token: Address,
        #[arg(long, value_parser = parse_address)]
        to: Address,
        /// Amount in token units, scaled by the token's decimals
        #[arg(long)]
        amount: String,
    },

    /// Approve a pending raw transaction (v1 vaults)
    Confirm {
        #[arg(long)]
        txid: u32,
    },

    /// Delete a pending raw transaction (v1 vaults)
    Cancel {
        #[arg(long)]
        txid: u32,
    },

    /// Propose a signer, daily limit and threshold change
    Propose {
        /// Signer to add or remove
        #[arg(long, value_parser = parse_address)]
        signer: Address,
        /// New daily limit in ether
        #[arg(long)]
        limit: String,
        #[arg(long)]
        threshold: u8,
        /// Pause the vault once the proposal executes (v2 vaults)
        #[arg(long)]
        paused: bool,
    },

    /// Approve a pending proposal
    ApproveProposal {
        #[arg(long)]
        id: u16,
    },

    /// Revoke a pending proposal
    RevokeProposal {
        #[arg(long)]
        id: u16,
    },

    /// Track an ERC-20 token with its price feed (v2 vaults)
    TrackToken {
        #[arg(long, value_parser = parse_address)]
        token: Address,
        #[arg(long, value_parser = parse_address)]
        price_feed: Address,
    },

    /// Show vault version, counters and balance
    Status,

    /// Show a pending proposal
    Proposal {
        #[arg(long)]
        id: u16,
    },

    /// Show a pending raw transaction (v1 vaults)
    PendingTx {
        #[arg(long)]
        txid: u32,
    },

    /// Show fee quotes for every tier
    Fees {
        /// Gas usage to price
        #[arg(long, default_value_t = 21_000)]
        gas: u64,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Deposit { .. } => "deposit",
            Command::Withdraw { .. } => "withdraw",
            Command::WithdrawToken { .. } => "withdraw-token",
            Command::Confirm { .. } => "confirm",
            Command::Cancel { .. } => "cancel",
            Command::Propose { .. } => "propose",
            Command::ApproveProposal { .. } => "approve-proposal",
            Command::RevokeProposal { .. } => "revoke-proposal",
            Command::TrackToken { .. } => "track-token",
            Command::Status => "status",
            Command::Proposal { .. } => "proposal",
            Command::PendingTx { .. } => "pending-tx",
            Command::Fees { .. } => "fees",
        }
    }

    /// The state-changing intent this command requests, if any
    pub fn intent(&self) -> VaultResult<Option<Intent>> {
        let intent = match self {
            Command::Deposit { amount } => Intent::Deposit {
                amount: amount.clone(),
            },
            Command::Withdraw { to, amount } => Intent::WithdrawEther {
                dest: *to,
                amount: amount.clone(),
            },
            Command::WithdrawToken { token, to, amount } => Intent::WithdrawToken {
                token: *token,
                dest: *to,
                amount: amount.clone(),
            },
            Command::Confirm { txid } => Intent::ConfirmTransfer { txid: *txid },
            Command::Cancel { txid } => Intent::CancelTransfer { txid: *txid },
            Command::Propose {
                signer,
                limit,
                threshold,
                paused,
            } => Intent::NewProposal {
                signer: *signer,
                limit: parse_limit(limit)?,
                threshold: *threshold,
                paused: *paused,
            },
            Command::ApproveProposal { id } => Intent::ApproveProposal { proposal_id: *id },
            Command::RevokeProposal { id } => Intent::RevokeProposal { proposal_id: *id },
            Command::TrackToken { token, price_feed } => Intent::TrackToken {
                token: *token,
                price_feed: *price_feed,
            },
            Command::Status
            | Command::Proposal { .. }
            | Command::PendingTx { .. }
            | Command::Fees { .. } => return Ok(None),
        };
        Ok(Some(intent))
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s).map_err(|e| format!("invalid address {}: {}", s, e))
}

/// Daily limits may be zero, unlike transfer amounts
fn parse_limit(limit: &str) -> VaultResult<U256> {
    let invalid = |reason: String| VaultError::InvalidAmount {
        amount: limit.to_string(),
        reason,
    };
    match parse_units(limit.trim(), ETHER_DECIMALS).map_err(|e| invalid(e.to_string()))? {
        ParseUnits::U256(value) => Ok(value),
        ParseUnits::I256(_) => Err(invalid("limit must not be negative".to_string())),
    }
}
