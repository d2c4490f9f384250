//! ERC-20 reads and amount scaling

use crate::abi::{token_to_uint, ContractCallEncoder, Interface};
use crate::chain::VaultRpc;
use crate::error::{VaultError, VaultResult};

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::{parse_units, ParseUnits};
use tracing::debug;

pub const ETHER_DECIMALS: u32 = 18;

/// Scale a decimal quantity such as `"2.5"` into base units
///
/// Quantities with more fractional digits than `decimals` are rejected, as are
/// zero and negative quantities.
pub fn scale_amount(amount: &str, decimals: u32) -> VaultResult<U256> {
    let invalid = |reason: String| VaultError::InvalidAmount {
        amount: amount.to_string(),
        reason,
    };

    let trimmed = amount.trim();
    if let Some((_, fraction)) = trimmed.split_once('.') {
        if fraction.len() > decimals as usize {
            return Err(invalid(format!(
                "{} decimal places given, at most {} supported",
                fraction.len(),
                decimals
            )));
        }
    }

    let value = match parse_units(trimmed, decimals).map_err(|e| invalid(e.to_string()))? {
        ParseUnits::U256(value) => value,
        ParseUnits::I256(_) => return Err(invalid("amount must not be negative".to_string())),
    };

    if value.is_zero() {
        return Err(invalid("amount must be greater than zero".to_string()));
    }
    Ok(value)
}

/// Read `decimals()` from a token. A failed read is an error, never 18.
pub async fn token_decimals(rpc: &dyn VaultRpc, token: Address) -> VaultResult<u32> {
    let encoder = ContractCallEncoder::new(Interface::Erc20);
    let raw = rpc.call(token, encoder.encode("decimals", &[])?).await?;
    let tokens = encoder.decode_output("decimals", &raw)?;
    let decimals = tokens
        .first()
        .map(token_to_uint)
        .transpose()?
        .ok_or_else(|| VaultError::Abi("decimals returned no value".to_string()))?;

    if decimals > U256::from(77) {
        return Err(VaultError::Abi(format!(
            "token {:?} reports {} decimals",
            token, decimals
        )));
    }

    debug!("Token {:?} uses {} decimals", token, decimals);
    Ok(decimals.as_u32())
}

/// Read `balanceOf(holder)` from a token
pub async fn token_balance(rpc: &dyn VaultRpc, token: Address, holder: Address) -> VaultResult<U256> {
    let encoder = ContractCallEncoder::new(Interface::Erc20);
    let data = encoder.encode("balanceOf", &[Token::Address(holder)])?;
    let raw = rpc.call(token, data).await?;
    let tokens = encoder.decode_output("balanceOf", &raw)?;
    tokens
        .first()
        .map(token_to_uint)
        .transpose()?
        .ok_or_else(|| VaultError::Abi("balanceOf returned no value".to_string()))
}

/// Call data for `transfer(to, amount)`, used as the inner call of a raw vault transaction
pub fn encode_transfer(to: Address, amount: U256) -> VaultResult<Bytes> {
    ContractCallEncoder::new(Interface::Erc20)
        .encode("transfer", &[Token::Address(to), Token::Uint(amount)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockVaultRpc;

    #[test]
    fn test_scale_amount() {
        assert_eq!(scale_amount("2.5", 6).unwrap(), U256::from(2_500_000));
        assert_eq!(
            scale_amount("0.05", ETHER_DECIMALS).unwrap(),
            U256::from(50_000_000_000_000_000u64)
        );
        assert_eq!(scale_amount("3", 0).unwrap(), U256::from(3));
    }

    #[test]
    fn test_scale_amount_rejects_bad_input() {
        assert!(matches!(scale_amount("1.1234567", 6), Err(VaultError::InvalidAmount { .. })));
        assert!(matches!(scale_amount("0", 6), Err(VaultError::InvalidAmount { .. })));
        assert!(matches!(scale_amount("abc", 6), Err(VaultError::InvalidAmount { .. })));
    }

    #[tokio::test]
    async fn test_decimals_failure_is_not_defaulted() {
        let mut rpc = MockVaultRpc::new();
        rpc.expect_call().times(1).returning(|_, _| {
            Err(VaultError::SimulationReverted {
                function: "eth_call".to_string(),
                reason: "execution reverted".to_string(),
            })
        });

        let err = token_decimals(&rpc, Address::repeat_byte(0x22)).await.unwrap_err();
        assert!(matches!(err, VaultError::SimulationReverted { .. }));
    }

    #[test]
    fn test_encode_transfer_selector() {
        let data = encode_transfer(Address::repeat_byte(0x33), U256::from(10)).unwrap();
        // transfer(address,uint256)
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
    }
}
