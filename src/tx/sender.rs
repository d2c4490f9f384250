//! Signing and single-shot submission of built transactions

use super::builder::BuiltTransaction;
use crate::chain::VaultRpc;
use crate::config::WalletConfig;
use crate::error::{VaultError, VaultResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use std::sync::Arc;
use tracing::{debug, info};

/// Signs envelopes with the local wallet and hands them to the node
pub struct Broadcaster {
    rpc: Arc<dyn VaultRpc>,
    wallet: LocalWallet,
}

impl Broadcaster {
    pub fn new(rpc: Arc<dyn VaultRpc>, wallet: LocalWallet) -> Self {
        info!("Broadcaster initialized with wallet: {:?}", wallet.address());
        Self { rpc, wallet }
    }

    /// Load the signing key from a private key variable, or from an encrypted
    /// keystore whose password is read from the environment
    pub fn load_wallet(config: &WalletConfig) -> VaultResult<LocalWallet> {
        if let Some(var) = &config.private_key_env {
            if let Ok(key) = std::env::var(var) {
                return key
                    .trim()
                    .trim_start_matches("0x")
                    .parse::<LocalWallet>()
                    .map_err(|e| VaultError::Wallet(format!("Invalid private key in {}: {}", var, e)));
            }
        }

        if let Some(path) = &config.keystore_path {
            let password_var = config.password_env.as_deref().ok_or_else(|| {
                VaultError::Wallet("keystore_path is set but password_env is not".to_string())
            })?;
            let password = std::env::var(password_var).map_err(|_| {
                VaultError::Wallet(format!("Keystore password variable {} is not set", password_var))
            })?;
            return LocalWallet::decrypt_keystore(path, password)
                .map_err(|e| VaultError::Wallet(format!("Failed to decrypt keystore {}: {}", path, e)));
        }

        Err(VaultError::Wallet(
            "No wallet configured. Set a private key variable or configure a keystore".to_string(),
        ))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign and submit. Consumes the transaction so an envelope is sent at most
    /// once; a rejection is returned as-is and nothing is retried.
    pub async fn broadcast(&self, built: BuiltTransaction) -> VaultResult<H256> {
        let envelope = built.envelope;
        if envelope.from != self.wallet.address() {
            return Err(VaultError::Wallet(format!(
                "Envelope sender {:?} does not match wallet {:?}",
                envelope.from,
                self.wallet.address()
            )));
        }

        let wallet = self.wallet.clone().with_chain_id(envelope.chain_id);
        let tx = envelope.to_typed();
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| VaultError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        debug!("Signed {} bytes for {}", raw.len(), built.intent);

        let tx_hash = self.rpc.send_raw_transaction(raw).await?;
        info!(
            "Transaction sent: {:?} ({}, account nonce {})",
            tx_hash, built.intent, envelope.nonce
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockVaultRpc;
    use crate::tx::{FeeQuote, PriorityTier, TransactionEnvelope};
    use crate::vault::ContractVersion;

    // Well-known development key
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn built(from: Address) -> BuiltTransaction {
        BuiltTransaction {
            intent: "deposit",
            version: ContractVersion::V2,
            function: None,
            exec_nonce: None,
            quote: FeeQuote {
                priority_tier: PriorityTier::Low,
                max_priority_fee_per_gas: U256::from(100_000_000u64),
                max_fee_per_gas: U256::from(2_000_000_000u64),
                estimated_gas_used: U256::from(21_000),
                estimated_total_fee_wei: U256::from(42_420_000_000_000u64),
            },
            envelope: TransactionEnvelope {
                from,
                to: Address::repeat_byte(0xaa),
                value: U256::exp10(17),
                data: Bytes::default(),
                gas: U256::from(25_200),
                max_fee_per_gas: U256::from(2_000_000_000u64),
                max_priority_fee_per_gas: U256::from(100_000_000u64),
                nonce: U256::from(4),
                chain_id: 5,
            },
        }
    }

    #[tokio::test]
    async fn test_broadcast_sends_signed_typed_envelope() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let from = wallet.address();
        let expected_hash = H256::repeat_byte(0x77);

        let mut rpc = MockVaultRpc::new();
        rpc.expect_send_raw_transaction()
            // EIP-2718 type byte for EIP-1559
            .withf(|raw| raw.first() == Some(&0x02))
            .times(1)
            .returning(move |_| Ok(expected_hash));

        let broadcaster = Broadcaster::new(Arc::new(rpc), wallet);
        let hash = broadcaster.broadcast(built(from)).await.unwrap();
        assert_eq!(hash, expected_hash);
    }

    #[tokio::test]
    async fn test_broadcast_rejects_foreign_sender() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let broadcaster = Broadcaster::new(Arc::new(MockVaultRpc::new()), wallet);

        let err = broadcaster
            .broadcast(built(Address::repeat_byte(0x01)))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Wallet(_)));
    }

    #[tokio::test]
    async fn test_node_rejection_is_not_retried() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let from = wallet.address();

        let mut rpc = MockVaultRpc::new();
        rpc.expect_send_raw_transaction()
            .times(1)
            .returning(|_| Err(VaultError::NonceMismatch("nonce too low".to_string())));

        let broadcaster = Broadcaster::new(Arc::new(rpc), wallet);
        let err = broadcaster.broadcast(built(from)).await.unwrap_err();
        assert_eq!(err, VaultError::NonceMismatch("nonce too low".to_string()));
    }

    #[test]
    fn test_load_wallet_from_env() {
        std::env::set_var("ETHERVAULT_TEST_KEY", DEV_KEY);
        let config = WalletConfig {
            keystore_path: None,
            password_env: None,
            private_key_env: Some("ETHERVAULT_TEST_KEY".to_string()),
        };
        let wallet = Broadcaster::load_wallet(&config).unwrap();
        assert_eq!(
            wallet.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_load_wallet_requires_configuration() {
        let config = WalletConfig {
            keystore_path: None,
            password_env: None,
            private_key_env: None,
        };
        assert!(matches!(
            Broadcaster::load_wallet(&config),
            Err(VaultError::Wallet(_))
        ));
    }
}
