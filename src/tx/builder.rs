//! Transaction assembly for vault intents
//!
//! Order matters: version, balance gate, execNonce, encoding, simulation, fee
//! quote, account nonce. Anything that can be rejected locally is rejected
//! before the more expensive reads are made.

use super::gas::{FeeEstimator, FeeQuote, PriorityTier};
use super::nonce::{read_exec_nonce, NonceCoordinator};
use crate::abi::ContractCallEncoder;
use crate::chain::{CallRequest, VaultRpc};
use crate::error::{VaultError, VaultResult};
use crate::vault::token::token_balance;
use crate::vault::{BalanceRequirement, CallKind, ContractVersion, Intent, VersionDispatcher};

use ethers::abi::Token;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable addressing for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultContext {
    pub vault: Address,
    pub sender: Address,
    pub chain_id: u64,
}

/// Fully priced EIP-1559 transaction, ready to sign
#[derive(Debug, Serialize)]
pub struct TransactionEnvelope {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// Account nonce of `from`, unrelated to the vault's execNonce
    pub nonce: U256,
    pub chain_id: u64,
}

impl TransactionEnvelope {
    pub fn to_typed(&self) -> TypedTransaction {
        TypedTransaction::Eip1559(
            Eip1559TransactionRequest::new()
                .from(self.from)
                .to(self.to)
                .value(self.value)
                .data(self.data.clone())
                .gas(self.gas)
                .nonce(self.nonce)
                .max_fee_per_gas(self.max_fee_per_gas)
                .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
                .chain_id(self.chain_id),
        )
    }
}

/// Envelope plus what went into it. Consumed by a single broadcast.
#[derive(Debug, Serialize)]
pub struct BuiltTransaction {
    pub intent: &'static str,
    #[serde(skip)]
    pub version: ContractVersion,
    pub function: Option<&'static str>,
    pub exec_nonce: Option<u32>,
    pub quote: FeeQuote,
    pub envelope: TransactionEnvelope,
}

/// Builds signable envelopes for vault intents
pub struct TransactionBuilder {
    rpc: Arc<dyn VaultRpc>,
    fees: FeeEstimator,
    nonces: NonceCoordinator,
}

impl TransactionBuilder {
    pub fn new(rpc: Arc<dyn VaultRpc>, fees: FeeEstimator, nonces: NonceCoordinator) -> Self {
        Self { rpc, fees, nonces }
    }

    /// Build the envelope for `intent` against the vault as deployed now
    pub async fn build(
        &self,
        ctx: &VaultContext,
        intent: &Intent,
        tier: PriorityTier,
    ) -> VaultResult<BuiltTransaction> {
        let rpc = self.rpc.as_ref();

        let protocol = VersionDispatcher::resolve(rpc, ctx.vault).await?;
        let plan = protocol.plan(intent, rpc).await?;

        if let Some(requirement) = &plan.requirement {
            self.check_vault_balance(ctx, requirement).await?;
        }

        let (function, data, value, exec_nonce) = match plan.kind {
            CallKind::Vault { function, mut args } => {
                let nonce = self
                    .nonces
                    .next_nonce(function, || read_exec_nonce(rpc, ctx.vault))
                    .await?;
                args.push(Token::Uint(nonce.into()));
                let data = ContractCallEncoder::new(protocol.interface()).encode(function, &args)?;
                (Some(function), data, U256::zero(), Some(nonce))
            }
            CallKind::Deposit { value } => (None, Bytes::default(), value, None),
        };

        let label = function.unwrap_or("deposit");
        let gas_used = rpc
            .estimate_gas(CallRequest {
                from: ctx.sender,
                to: ctx.vault,
                value,
                data: data.clone(),
                label: label.to_string(),
            })
            .await?;
        debug!("{} simulated at {} gas", label, gas_used);

        let quote = self.fees.quote(rpc, tier, gas_used).await?;
        self.check_sender_funds(ctx, value + quote.estimated_total_fee_wei)
            .await?;

        let chain_id = rpc.chain_id().await?;
        if chain_id != ctx.chain_id {
            return Err(VaultError::ChainMismatch {
                expected: ctx.chain_id,
                actual: chain_id,
            });
        }
        let account_nonce = rpc.transaction_count(ctx.sender).await?;

        let envelope = TransactionEnvelope {
            from: ctx.sender,
            to: ctx.vault,
            value,
            data,
            gas: self.fees.gas_limit(gas_used),
            max_fee_per_gas: quote.max_fee_per_gas,
            max_priority_fee_per_gas: quote.max_priority_fee_per_gas,
            nonce: account_nonce,
            chain_id,
        };

        info!(
            "Built {} ({}) on {}: gas {}, max fee {} wei, account nonce {}",
            plan.intent,
            label,
            protocol.version(),
            envelope.gas,
            envelope.max_fee_per_gas,
            envelope.nonce
        );

        Ok(BuiltTransaction {
            intent: plan.intent,
            version: protocol.version(),
            function,
            exec_nonce,
            quote,
            envelope,
        })
    }

    async fn check_vault_balance(
        &self,
        ctx: &VaultContext,
        requirement: &BalanceRequirement,
    ) -> VaultResult<()> {
        let rpc = self.rpc.as_ref();
        let (asset, have, need) = match requirement {
            BalanceRequirement::VaultEther(need) => {
                ("ether".to_string(), rpc.balance(ctx.vault).await?, *need)
            }
            BalanceRequirement::VaultToken { token, amount } => (
                format!("token {:?}", token),
                token_balance(rpc, *token, ctx.vault).await?,
                *amount,
            ),
        };

        if have < need {
            return Err(VaultError::InsufficientBalance {
                asset: format!("vault {}", asset),
                have: have.to_string(),
                need: need.to_string(),
            });
        }
        Ok(())
    }

    async fn check_sender_funds(&self, ctx: &VaultContext, need: U256) -> VaultResult<()> {
        let have = self.rpc.balance(ctx.sender).await?;
        if have < need {
            return Err(VaultError::InsufficientBalance {
                asset: "sender gas".to_string(),
                have: have.to_string(),
                need: need.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Interface;
    use crate::chain::{FeeHistorySample, MockVaultRpc};
    use crate::config::FeeConfig;
    use crate::tx::NoncePolicy;
    use std::collections::HashMap;

    const CHAIN_ID: u64 = 5;

    fn ctx() -> VaultContext {
        VaultContext {
            vault: Address::repeat_byte(0xaa),
            sender: Address::repeat_byte(0xbb),
            chain_id: CHAIN_ID,
        }
    }

    fn word(value: u64) -> Bytes {
        let mut out = [0u8; 32];
        U256::from(value).to_big_endian(&mut out);
        out.to_vec().into()
    }

    fn selector(interface: Interface, function: &str) -> [u8; 4] {
        interface.function(function).unwrap().short_signature()
    }

    /// Answers version() and execNonce() by selector
    fn stub_views(rpc: &mut MockVaultRpc, version: u64, exec_nonce: u64) {
        let version_sel = selector(Interface::V2, "version");
        let nonce_sel = selector(Interface::Legacy, "execNonce");
        rpc.expect_call().returning(move |_, data| {
            if data[..4] == version_sel {
                Ok(word(version))
            } else if data[..4] == nonce_sel {
                Ok(word(exec_nonce))
            } else {
                panic!("unexpected view call 0x{}", hex::encode(&data[..4]));
            }
        });
    }

    fn stub_pricing(rpc: &mut MockVaultRpc) {
        rpc.expect_estimate_gas()
            .times(1)
            .returning(|_| Ok(U256::from(50_000)));
        rpc.expect_fee_history().times(1).returning(|_, _| {
            Ok(FeeHistorySample {
                base_fee_per_gas: vec![U256::from(100), U256::from(95)],
                reward: vec![[U256::from(1), U256::from(5), U256::from(10)]],
            })
        });
        rpc.expect_chain_id().returning(|| Ok(CHAIN_ID));
        rpc.expect_transaction_count()
            .times(1)
            .returning(|_| Ok(U256::from(3)));
    }

    fn builder(rpc: MockVaultRpc, overrides: HashMap<String, u32>) -> TransactionBuilder {
        TransactionBuilder::new(
            Arc::new(rpc),
            FeeEstimator::new(&FeeConfig::default()),
            NonceCoordinator::new(NoncePolicy::new(&overrides).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_balance_gate_fails_before_pricing() {
        let mut rpc = MockVaultRpc::new();
        let version_sel = selector(Interface::V2, "version");
        // Only the version read is allowed; an execNonce read would be a second call
        rpc.expect_call()
            .withf(move |_, data| data[..4] == version_sel)
            .times(1)
            .returning(|_, _| Ok(word(1)));
        rpc.expect_balance()
            .withf(|account| *account == Address::repeat_byte(0xaa))
            .times(1)
            .returning(|_| Ok(U256::exp10(18)));

        let builder = builder(rpc, HashMap::new());
        let intent = Intent::WithdrawEther {
            dest: Address::repeat_byte(0x01),
            amount: "2.0".to_string(),
        };

        let err = builder
            .build(&ctx(), &intent, PriorityTier::Medium)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VaultError::InsufficientBalance {
                asset: "vault ether".to_string(),
                have: U256::exp10(18).to_string(),
                need: (U256::exp10(18) * U256::from(2)).to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_build_confirm_on_legacy() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 1, 7);
        stub_pricing(&mut rpc);
        rpc.expect_balance().returning(|_| Ok(U256::exp10(18)));

        let builder = builder(rpc, HashMap::new());
        let built = builder
            .build(&ctx(), &Intent::ConfirmTransfer { txid: 42 }, PriorityTier::Medium)
            .await
            .unwrap();

        let envelope = &built.envelope;
        assert_eq!(envelope.value, U256::zero());
        assert_eq!(envelope.to, ctx().vault);
        assert_eq!(envelope.from, ctx().sender);
        assert_eq!(envelope.gas, U256::from(60_000));
        assert_eq!(envelope.nonce, U256::from(3));
        assert_eq!(envelope.chain_id, CHAIN_ID);
        assert_eq!(envelope.max_priority_fee_per_gas, U256::from(150_000_000u64));
        assert_eq!(envelope.max_fee_per_gas, U256::from(150_000_000u64 + 114));
        assert_eq!(built.exec_nonce, Some(7));
        assert_eq!(built.function, Some("approveTx"));

        let decoded = ContractCallEncoder::new(Interface::Legacy)
            .decode_input("approveTx", &envelope.data)
            .unwrap();
        assert_eq!(decoded[0].1, Token::Uint(42.into()));
        assert_eq!(decoded[1].1, Token::Uint(7.into()));
    }

    #[tokio::test]
    async fn test_build_track_token_on_v2() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 2, 9);
        stub_pricing(&mut rpc);
        rpc.expect_balance().returning(|_| Ok(U256::exp10(18)));

        let token = Address::repeat_byte(0x10);
        let price_feed = Address::repeat_byte(0x11);
        let builder = builder(rpc, HashMap::new());
        let built = builder
            .build(&ctx(), &Intent::TrackToken { token, price_feed }, PriorityTier::Medium)
            .await
            .unwrap();

        assert_eq!(built.version, ContractVersion::V2);
        assert_eq!(built.envelope.value, U256::zero());
        let decoded = ContractCallEncoder::new(Interface::V2)
            .decode_input("trackToken", &built.envelope.data)
            .unwrap();
        let args: Vec<Token> = decoded.into_iter().map(|(_, token)| token).collect();
        assert_eq!(
            args,
            vec![
                Token::Address(token),
                Token::Address(price_feed),
                Token::Uint(9.into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_build_ether_withdrawal_on_v2() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 2, 9);
        stub_pricing(&mut rpc);
        // Vault and sender both hold two ether
        rpc.expect_balance()
            .returning(|_| Ok(U256::exp10(18) * U256::from(2)));

        let dest = Address::repeat_byte(0x01);
        let builder = builder(rpc, HashMap::new());
        let intent = Intent::WithdrawEther {
            dest,
            amount: "1.5".to_string(),
        };
        let built = builder
            .build(&ctx(), &intent, PriorityTier::Medium)
            .await
            .unwrap();

        assert_eq!(built.envelope.value, U256::zero());
        assert_eq!(built.function, Some("withdraw"));
        let decoded = ContractCallEncoder::new(Interface::V2)
            .decode_input("withdraw", &built.envelope.data)
            .unwrap();
        let args: Vec<Token> = decoded.into_iter().map(|(_, token)| token).collect();
        assert_eq!(
            args,
            vec![
                Token::Address(Address::zero()),
                Token::Address(dest),
                Token::Uint(U256::from(1_500_000_000_000_000_000u64)),
                Token::Uint(9.into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_vault_without_version_builds_legacy_confirm() {
        let mut rpc = MockVaultRpc::new();
        let nonce_sel = selector(Interface::Legacy, "execNonce");
        rpc.expect_call().returning(move |_, data| {
            if data[..4] == nonce_sel {
                Ok(word(3))
            } else {
                Err(VaultError::from_rpc_error("eth_call", "execution reverted"))
            }
        });
        stub_pricing(&mut rpc);
        rpc.expect_balance().returning(|_| Ok(U256::exp10(18)));

        let builder = builder(rpc, HashMap::new());
        let built = builder
            .build(&ctx(), &Intent::ConfirmTransfer { txid: 1 }, PriorityTier::Low)
            .await
            .unwrap();

        assert_eq!(built.version, ContractVersion::Legacy);
        assert_eq!(built.function, Some("approveTx"));
        assert_eq!(built.exec_nonce, Some(3));
    }

    #[tokio::test]
    async fn test_build_applies_configured_offset() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 1, 7);
        stub_pricing(&mut rpc);
        rpc.expect_balance().returning(|_| Ok(U256::exp10(18)));

        let overrides = HashMap::from([("deleteTx".to_string(), 1)]);
        let builder = builder(rpc, overrides);
        let built = builder
            .build(&ctx(), &Intent::CancelTransfer { txid: 4 }, PriorityTier::Low)
            .await
            .unwrap();

        assert_eq!(built.exec_nonce, Some(8));
    }

    #[tokio::test]
    async fn test_track_token_on_legacy_makes_no_writes() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 1, 0);

        let builder = builder(rpc, HashMap::new());
        let intent = Intent::TrackToken {
            token: Address::repeat_byte(0x10),
            price_feed: Address::repeat_byte(0x11),
        };
        let err = builder
            .build(&ctx(), &intent, PriorityTier::High)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedInVersion { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_simulation_revert_stops_build() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 2, 0);
        rpc.expect_estimate_gas().times(1).returning(|request| {
            Err(VaultError::SimulationReverted {
                function: request.label,
                reason: "execution reverted".to_string(),
            })
        });

        let builder = builder(rpc, HashMap::new());
        let intent = Intent::ApproveProposal { proposal_id: 1 };
        let err = builder
            .build(&ctx(), &intent, PriorityTier::High)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VaultError::SimulationReverted {
                function: "approveProposal".to_string(),
                reason: "execution reverted".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_deposit_checks_value_plus_fee() {
        let mut rpc = MockVaultRpc::new();
        stub_views(&mut rpc, 2, 0);
        rpc.expect_estimate_gas()
            .withf(|request| request.value == U256::exp10(18) && request.data.is_empty())
            .returning(|_| Ok(U256::from(21_000)));
        rpc.expect_fee_history().returning(|_, _| {
            Ok(FeeHistorySample {
                base_fee_per_gas: vec![U256::from(100)],
                reward: vec![[U256::from(1), U256::from(5), U256::from(10)]],
            })
        });
        // Exactly one ether: not enough once gas is added
        rpc.expect_balance().returning(|_| Ok(U256::exp10(18)));

        let builder = builder(rpc, HashMap::new());
        let err = builder
            .build(
                &ctx(),
                &Intent::Deposit {
                    amount: "1".to_string(),
                },
                PriorityTier::Low,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { .. }));
    }
}
