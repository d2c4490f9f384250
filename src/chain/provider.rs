//! Chain provider backed by an ethers HTTP transport, with per-call timeouts

use super::{CallRequest, FeeHistorySample, VaultRpc};
use crate::config::NetworkConfig;
use crate::error::{VaultError, VaultResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Single-endpoint provider for one configured network
pub struct ChainProvider {
    /// Network configuration
    config: NetworkConfig,
    /// HTTP transport
    http: Provider<Http>,
    /// Upper bound for any single RPC round trip
    timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: NetworkConfig, rpc_timeout: Duration) -> VaultResult<Self> {
        let http = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            VaultError::Config(format!("Invalid RPC URL {}: {}", config.rpc_url, e))
        })?;

        debug!(
            "Created HTTP provider for chain {} (timeout {:?})",
            config.chain_id, rpc_timeout
        );

        Ok(Self {
            config,
            http,
            timeout: rpc_timeout,
        })
    }

    /// Check the node serves the chain this network is configured for
    pub async fn verify_chain_id(&self) -> VaultResult<u64> {
        let actual = self.chain_id().await?;
        if actual != self.config.chain_id {
            return Err(VaultError::ChainMismatch {
                expected: self.config.chain_id,
                actual,
            });
        }
        info!("Connected to chain {}", actual);
        Ok(actual)
    }

    /// Run an RPC future under the configured timeout
    async fn timed<T, F, M>(&self, operation: &str, fut: F, map_err: M) -> VaultResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
        M: FnOnce(ProviderError) -> VaultError,
    {
        match timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_err(e)),
            Err(_) => Err(VaultError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }

    fn unavailable(operation: &'static str) -> impl FnOnce(ProviderError) -> VaultError {
        move |e| VaultError::RpcUnavailable {
            operation: operation.to_string(),
            message: e.to_string(),
        }
    }

    fn to_typed(request: &CallRequest) -> TypedTransaction {
        TypedTransaction::Eip1559(
            Eip1559TransactionRequest::new()
                .from(request.from)
                .to(request.to)
                .value(request.value)
                .data(request.data.clone()),
        )
    }
}

#[async_trait]
impl VaultRpc for ChainProvider {
    async fn chain_id(&self) -> VaultResult<u64> {
        let id = self
            .timed(
                "eth_chainId",
                self.http.get_chainid(),
                Self::unavailable("eth_chainId"),
            )
            .await?;
        Ok(id.low_u64())
    }

    async fn fee_history(
        &self,
        block_count: u64,
        reward_percentiles: [f64; 3],
    ) -> VaultResult<FeeHistorySample> {
        let history = self
            .timed(
                "eth_feeHistory",
                self.http
                    .fee_history(block_count, BlockNumber::Latest, &reward_percentiles),
                Self::unavailable("eth_feeHistory"),
            )
            .await?;

        let mut reward = Vec::with_capacity(history.reward.len());
        for row in &history.reward {
            let triple: [U256; 3] =
                row.as_slice()
                    .try_into()
                    .map_err(|_| VaultError::RpcUnavailable {
                        operation: "eth_feeHistory".to_string(),
                        message: format!("expected 3 reward percentiles, got {}", row.len()),
                    })?;
            reward.push(triple);
        }

        debug!(
            "Fee history for chain {}: {} blocks from {}",
            self.config.chain_id,
            reward.len(),
            history.oldest_block
        );

        Ok(FeeHistorySample {
            base_fee_per_gas: history.base_fee_per_gas,
            reward,
        })
    }

    async fn estimate_gas(&self, request: CallRequest) -> VaultResult<U256> {
        let tx = Self::to_typed(&request);
        let label = request.label.clone();
        self.timed("eth_estimateGas", self.http.estimate_gas(&tx, None), move |e| {
            VaultError::from_rpc_error(&label, &e.to_string())
        })
        .await
    }

    async fn transaction_count(&self, account: Address) -> VaultResult<U256> {
        self.timed(
            "eth_getTransactionCount",
            self.http
                .get_transaction_count(account, Some(BlockNumber::Pending.into())),
            Self::unavailable("eth_getTransactionCount"),
        )
        .await
    }

    async fn balance(&self, account: Address) -> VaultResult<U256> {
        self.timed(
            "eth_getBalance",
            self.http.get_balance(account, None),
            Self::unavailable("eth_getBalance"),
        )
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> VaultResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.timed("eth_call", self.http.call(&tx, None), |e| {
            VaultError::from_rpc_error("eth_call", &e.to_string())
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> VaultResult<H256> {
        self.timed(
            "eth_sendRawTransaction",
            async {
                self.http
                    .send_raw_transaction(raw)
                    .await
                    .map(|pending| pending.tx_hash())
            },
            |e| VaultError::from_rpc_error("eth_sendRawTransaction", &e.to_string()),
        )
        .await
    }
}
