//! Error types for the EtherVault client

use thiserror::Error;

/// Main error type for vault operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC unavailable during {operation}: {message}")]
    RpcUnavailable { operation: String, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Call to {function} would revert: {reason}")]
    SimulationReverted { function: String, reason: String },

    #[error("Insufficient {asset} balance: have {have}, need {need}")]
    InsufficientBalance {
        asset: String,
        have: String,
        need: String,
    },

    #[error("{intent} is not available on contract version {version} (requires version {required})")]
    UnsupportedInVersion {
        intent: String,
        version: u64,
        required: u64,
    },

    #[error("Unsupported contract version {0}")]
    UnsupportedVersion(u64),

    #[error("Function {function} not found in {interface} interface")]
    UnknownFunction { function: String, interface: String },

    #[error("Argument {param} of {function} does not fit {expected}: {reason}")]
    InvalidArgumentWidth {
        function: String,
        param: String,
        expected: String,
        reason: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid priority tier: {0} (expected low, medium, high or polygon)")]
    InvalidPriorityTier(String),

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("No nonce convention registered for {function}")]
    NoncePolicy { function: String },

    #[error("Nonce rejected by the network: {0}")]
    NonceMismatch(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Chain id mismatch: configured {expected}, node reports {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

impl VaultError {
    /// Check if the operation can be retried by hand without changing inputs
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::RpcUnavailable { .. }
                | VaultError::Timeout { .. }
                | VaultError::NonceMismatch(_)
        )
    }

    /// Classify a node error string from a write or simulation call
    pub fn from_rpc_error(function: &str, message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("execution reverted") || lower.contains("revert") {
            VaultError::SimulationReverted {
                function: function.to_string(),
                reason: message.to_string(),
            }
        } else if lower.contains("nonce too low") || lower.contains("nonce too high") {
            VaultError::NonceMismatch(message.to_string())
        } else if lower.contains("insufficient funds") {
            VaultError::InsufficientBalance {
                asset: "gas".to_string(),
                have: "unknown".to_string(),
                need: "unknown".to_string(),
            }
        } else {
            VaultError::RpcUnavailable {
                operation: function.to_string(),
                message: message.to_string(),
            }
        }
    }
}

impl From<ethers::abi::Error> for VaultError {
    fn from(e: ethers::abi::Error) -> Self {
        VaultError::Abi(e.to_string())
    }
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_revert() {
        let err = VaultError::from_rpc_error("approveTx", "execution reverted: 0x4e4f");
        assert!(matches!(err, VaultError::SimulationReverted { .. }));
    }

    #[test]
    fn test_classify_nonce_and_funds() {
        assert!(matches!(
            VaultError::from_rpc_error("send", "nonce too low: next nonce 12, tx nonce 11"),
            VaultError::NonceMismatch(_)
        ));
        assert!(matches!(
            VaultError::from_rpc_error("send", "insufficient funds for gas * price + value"),
            VaultError::InsufficientBalance { .. }
        ));
        let other = VaultError::from_rpc_error("send", "connection refused");
        assert!(other.is_retryable());
    }
}
