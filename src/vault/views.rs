//! Read-only views over vault storage

use super::{ContractVersion, VaultProtocol};
use crate::abi::{token_to_uint, ContractCallEncoder};
use crate::chain::VaultRpc;
use crate::error::{VaultError, VaultResult};
use crate::tx::read_exec_nonce;

use chrono::{DateTime, TimeZone, Utc};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use serde::Serialize;

/// Snapshot of vault configuration and counters
#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub version: u64,
    pub exec_nonce: u32,
    pub threshold: U256,
    pub signer_count: U256,
    pub daily_limit: U256,
    pub spent_today: U256,
    pub proposal_id: U256,
    pub balance_wei: U256,
}

/// `pendingProposals(id)`
#[derive(Debug, Clone, Serialize)]
pub struct PendingProposal {
    pub proposal_id: u16,
    pub proposer: Address,
    pub modified_signer: Address,
    pub new_threshold: U256,
    pub num_signers: U256,
    pub initiated: Option<DateTime<Utc>>,
    pub new_limit: U256,
}

/// `pendingTxs(id)`
#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    pub txid: u32,
    pub dest: Address,
    pub value: U256,
    pub data: Bytes,
    pub num_signers: U256,
}

async fn view(
    rpc: &dyn VaultRpc,
    encoder: ContractCallEncoder,
    vault: Address,
    function: &str,
    args: &[Token],
) -> VaultResult<Vec<Token>> {
    let raw = rpc.call(vault, encoder.encode(function, args)?).await?;
    encoder.decode_output(function, &raw)
}

async fn view_uint(
    rpc: &dyn VaultRpc,
    encoder: ContractCallEncoder,
    vault: Address,
    function: &str,
) -> VaultResult<U256> {
    let tokens = view(rpc, encoder, vault, function, &[]).await?;
    tokens
        .first()
        .map(token_to_uint)
        .transpose()?
        .ok_or_else(|| VaultError::Abi(format!("{} returned no value", function)))
}

fn field<'a>(tokens: &'a [Token], index: usize, function: &str) -> VaultResult<&'a Token> {
    tokens
        .get(index)
        .ok_or_else(|| VaultError::Abi(format!("{} returned too few fields", function)))
}

fn address_field(tokens: &[Token], index: usize, function: &str) -> VaultResult<Address> {
    field(tokens, index, function)?
        .clone()
        .into_address()
        .ok_or_else(|| VaultError::Abi(format!("{} field {} is not an address", function, index)))
}

/// Read the vault's counters and limits concurrently
pub async fn vault_status(
    rpc: &dyn VaultRpc,
    protocol: &dyn VaultProtocol,
    vault: Address,
) -> VaultResult<VaultStatus> {
    let encoder = ContractCallEncoder::new(protocol.interface());

    let (exec_nonce, threshold, signer_count, daily_limit, spent_today, proposal_id, balance_wei) =
        futures::try_join!(
            read_exec_nonce(rpc, vault),
            view_uint(rpc, encoder, vault, "threshold"),
            view_uint(rpc, encoder, vault, "signerCount"),
            view_uint(rpc, encoder, vault, "dailyLimit"),
            view_uint(rpc, encoder, vault, "spentToday"),
            view_uint(rpc, encoder, vault, "proposalId"),
            rpc.balance(vault),
        )?;

    Ok(VaultStatus {
        version: protocol.version().number(),
        exec_nonce,
        threshold,
        signer_count,
        daily_limit,
        spent_today,
        proposal_id,
        balance_wei,
    })
}

pub async fn pending_proposal(
    rpc: &dyn VaultRpc,
    protocol: &dyn VaultProtocol,
    vault: Address,
    proposal_id: u16,
) -> VaultResult<PendingProposal> {
    let function = "pendingProposals";
    let encoder = ContractCallEncoder::new(protocol.interface());
    let tokens = view(
        rpc,
        encoder,
        vault,
        function,
        &[Token::Uint(proposal_id.into())],
    )
    .await?;

    let initiated = token_to_uint(field(&tokens, 4, function)?)?;
    let initiated = if initiated.is_zero() {
        None
    } else {
        Utc.timestamp_opt(initiated.low_u64() as i64, 0).single()
    };

    Ok(PendingProposal {
        proposal_id,
        proposer: address_field(&tokens, 0, function)?,
        modified_signer: address_field(&tokens, 1, function)?,
        new_threshold: token_to_uint(field(&tokens, 2, function)?)?,
        num_signers: token_to_uint(field(&tokens, 3, function)?)?,
        initiated,
        new_limit: token_to_uint(field(&tokens, 5, function)?)?,
    })
}

/// Raw pending transactions only exist on the legacy contract
pub async fn pending_transaction(
    rpc: &dyn VaultRpc,
    protocol: &dyn VaultProtocol,
    vault: Address,
    txid: u32,
) -> VaultResult<PendingTransaction> {
    let function = "pendingTxs";
    if protocol.version() != ContractVersion::Legacy {
        return Err(VaultError::UnsupportedInVersion {
            intent: "pending transaction view".to_string(),
            version: protocol.version().number(),
            required: ContractVersion::Legacy.number(),
        });
    }

    let encoder = ContractCallEncoder::new(protocol.interface());
    let tokens = view(rpc, encoder, vault, function, &[Token::Uint(txid.into())]).await?;

    let data = field(&tokens, 2, function)?
        .clone()
        .into_bytes()
        .ok_or_else(|| VaultError::Abi("pendingTxs data is not bytes".to_string()))?;

    Ok(PendingTransaction {
        txid,
        dest: address_field(&tokens, 0, function)?,
        value: token_to_uint(field(&tokens, 1, function)?)?,
        data: Bytes::from(data),
        num_signers: token_to_uint(field(&tokens, 3, function)?)?,
    })
}
