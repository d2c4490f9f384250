//! Legacy and v2 call conventions

use super::token::{encode_transfer, scale_amount, token_decimals, ETHER_DECIMALS};
use super::{BalanceRequirement, CallKind, CallPlan, ContractVersion, Intent, VaultProtocol};
use crate::abi::Interface;
use crate::chain::VaultRpc;
use crate::error::{VaultError, VaultResult};

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, U256};

fn unsupported(intent: &Intent, version: ContractVersion, required: ContractVersion) -> VaultError {
    VaultError::UnsupportedInVersion {
        intent: intent.name().to_string(),
        version: version.number(),
        required: required.number(),
    }
}

fn plan_deposit(intent: &Intent, amount: &str) -> VaultResult<CallPlan> {
    Ok(CallPlan {
        intent: intent.name(),
        kind: CallKind::Deposit {
            value: scale_amount(amount, ETHER_DECIMALS)?,
        },
        requirement: None,
    })
}

/// Raw submit/approve/delete transaction flow
pub struct LegacyProtocol;

#[async_trait]
impl VaultProtocol for LegacyProtocol {
    fn version(&self) -> ContractVersion {
        ContractVersion::Legacy
    }

    fn interface(&self) -> Interface {
        ContractVersion::Legacy.interface()
    }

    async fn plan(&self, intent: &Intent, rpc: &dyn VaultRpc) -> VaultResult<CallPlan> {
        match intent {
            Intent::Deposit { amount } => plan_deposit(intent, amount),
            Intent::WithdrawEther { dest, amount } => {
                let value = scale_amount(amount, ETHER_DECIMALS)?;
                Ok(CallPlan::vault(
                    intent,
                    "submitTx",
                    vec![
                        Token::Address(*dest),
                        Token::Uint(value),
                        Token::Bytes(Vec::new()),
                    ],
                )
                .requiring(BalanceRequirement::VaultEther(value)))
            }
            Intent::WithdrawToken {
                token,
                dest,
                amount,
            } => {
                let decimals = token_decimals(rpc, *token).await?;
                let raw_amount = scale_amount(amount, decimals)?;
                let inner = encode_transfer(*dest, raw_amount)?;
                Ok(CallPlan::vault(
                    intent,
                    "submitRawTx",
                    vec![
                        Token::Address(*token),
                        Token::Uint(U256::zero()),
                        Token::Bytes(inner.to_vec()),
                    ],
                )
                .requiring(BalanceRequirement::VaultToken {
                    token: *token,
                    amount: raw_amount,
                }))
            }
            Intent::CancelTransfer { txid } => Ok(CallPlan::vault(
                intent,
                "deleteTx",
                vec![Token::Uint((*txid).into())],
            )),
            Intent::ConfirmTransfer { txid } => Ok(CallPlan::vault(
                intent,
                "approveTx",
                vec![Token::Uint((*txid).into())],
            )),
            Intent::NewProposal {
                signer,
                limit,
                threshold,
                paused,
            } => {
                if *paused {
                    return Err(VaultError::UnsupportedInVersion {
                        intent: "pause flag on proposals".to_string(),
                        version: 1,
                        required: 2,
                    });
                }
                Ok(CallPlan::vault(
                    intent,
                    "newProposal",
                    vec![
                        Token::Address(*signer),
                        Token::Uint(*limit),
                        Token::Uint((*threshold).into()),
                    ],
                ))
            }
            Intent::ApproveProposal { proposal_id } => Ok(CallPlan::vault(
                intent,
                "approveProposal",
                vec![Token::Uint((*proposal_id).into())],
            )),
            Intent::RevokeProposal { proposal_id } => Ok(CallPlan::vault(
                intent,
                "deleteProposal",
                vec![Token::Uint((*proposal_id).into())],
            )),
            Intent::TrackToken { .. } => Err(unsupported(
                intent,
                ContractVersion::Legacy,
                ContractVersion::V2,
            )),
        }
    }
}

/// Direct withdraw and token tracking flow
pub struct V2Protocol;

#[async_trait]
impl VaultProtocol for V2Protocol {
    fn version(&self) -> ContractVersion {
        ContractVersion::V2
    }

    fn interface(&self) -> Interface {
        ContractVersion::V2.interface()
    }

    async fn plan(&self, intent: &Intent, rpc: &dyn VaultRpc) -> VaultResult<CallPlan> {
        match intent {
            Intent::Deposit { amount } => plan_deposit(intent, amount),
            Intent::WithdrawEther { dest, amount } => {
                let value = scale_amount(amount, ETHER_DECIMALS)?;
                Ok(CallPlan::vault(
                    intent,
                    "withdraw",
                    vec![
                        Token::Address(Address::zero()),
                        Token::Address(*dest),
                        Token::Uint(value),
                    ],
                )
                .requiring(BalanceRequirement::VaultEther(value)))
            }
            Intent::WithdrawToken {
                token,
                dest,
                amount,
            } => {
                let decimals = token_decimals(rpc, *token).await?;
                let raw_amount = scale_amount(amount, decimals)?;
                Ok(CallPlan::vault(
                    intent,
                    "withdraw",
                    vec![
                        Token::Address(*token),
                        Token::Address(*dest),
                        Token::Uint(raw_amount),
                    ],
                )
                .requiring(BalanceRequirement::VaultToken {
                    token: *token,
                    amount: raw_amount,
                }))
            }
            Intent::CancelTransfer { .. } | Intent::ConfirmTransfer { .. } => Err(unsupported(
                intent,
                ContractVersion::V2,
                ContractVersion::Legacy,
            )),
            Intent::NewProposal {
                signer,
                limit,
                threshold,
                paused,
            } => Ok(CallPlan::vault(
                intent,
                "newProposal",
                vec![
                    Token::Address(*signer),
                    Token::Uint(*limit),
                    Token::Uint((*threshold).into()),
                    Token::Bool(*paused),
                ],
            )),
            Intent::ApproveProposal { proposal_id } => Ok(CallPlan::vault(
                intent,
                "approveProposal",
                vec![Token::Uint((*proposal_id).into())],
            )),
            Intent::RevokeProposal { proposal_id } => Ok(CallPlan::vault(
                intent,
                "deleteProposal",
                vec![Token::Uint((*proposal_id).into())],
            )),
            Intent::TrackToken { token, price_feed } => Ok(CallPlan::vault(
                intent,
                "trackToken",
                vec![Token::Address(*token), Token::Address(*price_feed)],
            )),
        }
    }
}
