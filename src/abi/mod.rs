//! Contract interface descriptions and call data encoding
//!
//! The vault ships two incompatible interfaces (legacy raw-transaction flow and
//! the v2 withdraw/track-token flow). Both descriptions, plus the standard
//! ERC-20 surface used for inner `transfer` calls and token reads, are bundled
//! as JSON ABI files and parsed once.

use crate::error::{VaultError, VaultResult};

use ethers::abi::{Abi, Function, ParamType, Token};
use ethers::types::Bytes;
use lazy_static::lazy_static;
use std::fmt;
use tracing::debug;

lazy_static! {
    static ref LEGACY_ABI: Abi = serde_json::from_str(include_str!("../../abi/legacy.json"))
        .expect("bundled legacy vault ABI is valid");
    static ref V2_ABI: Abi = serde_json::from_str(include_str!("../../abi/v2.json"))
        .expect("bundled v2 vault ABI is valid");
    static ref ERC20_ABI: Abi = serde_json::from_str(include_str!("../../abi/erc20.json"))
        .expect("bundled ERC-20 ABI is valid");
}

/// A published interface description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Legacy,
    V2,
    Erc20,
}

impl Interface {
    pub fn abi(&self) -> &'static Abi {
        match self {
            Interface::Legacy => &LEGACY_ABI,
            Interface::V2 => &V2_ABI,
            Interface::Erc20 => &ERC20_ABI,
        }
    }

    /// Look up a function by name
    pub fn function(&self, name: &str) -> VaultResult<&'static Function> {
        self.abi()
            .function(name)
            .map_err(|_| VaultError::UnknownFunction {
                function: name.to_string(),
                interface: self.to_string(),
            })
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interface::Legacy => "legacy vault",
            Interface::V2 => "v2 vault",
            Interface::Erc20 => "ERC-20",
        };
        f.write_str(name)
    }
}

/// Encodes and decodes calls against one interface description
#[derive(Debug, Clone, Copy)]
pub struct ContractCallEncoder {
    interface: Interface,
}

impl ContractCallEncoder {
    pub fn new(interface: Interface) -> Self {
        Self { interface }
    }

    /// Encode `function(args...)` into call data
    ///
    /// Every argument is checked against the declared parameter type before
    /// encoding. Integers wider than the declared width are rejected rather
    /// than truncated.
    pub fn encode(&self, function: &str, args: &[Token]) -> VaultResult<Bytes> {
        let func = self.interface.function(function)?;

        if func.inputs.len() != args.len() {
            return Err(VaultError::InvalidArgument(format!(
                "{} expects {} arguments, got {}",
                function,
                func.inputs.len(),
                args.len()
            )));
        }

        for (param, token) in func.inputs.iter().zip(args) {
            check_token(&param.kind, token).map_err(|reason| VaultError::InvalidArgumentWidth {
                function: function.to_string(),
                param: display_name(&param.name),
                expected: param.kind.to_string(),
                reason,
            })?;
        }

        let data = func.encode_input(args)?;
        debug!("Encoded {}: 0x{}", function, hex::encode(&data));
        Ok(Bytes::from(data))
    }

    /// Decode call data produced by [`encode`](Self::encode) into named arguments
    pub fn decode_input(&self, function: &str, data: &[u8]) -> VaultResult<Vec<(String, Token)>> {
        let func = self.interface.function(function)?;

        if data.len() < 4 || data[..4] != func.short_signature() {
            return Err(VaultError::Abi(format!(
                "call data does not start with the {} selector",
                function
            )));
        }

        let tokens = func.decode_input(&data[4..])?;
        Ok(func
            .inputs
            .iter()
            .map(|p| p.name.clone())
            .zip(tokens)
            .collect())
    }

    /// Decode the return data of a view call
    pub fn decode_output(&self, function: &str, data: &[u8]) -> VaultResult<Vec<Token>> {
        let func = self.interface.function(function)?;
        Ok(func.decode_output(data)?)
    }
}

fn display_name(name: &str) -> String {
    if name.is_empty() {
        "<unnamed>".to_string()
    } else {
        name.to_string()
    }
}

/// Check a token matches the declared parameter type and width
fn check_token(kind: &ParamType, token: &Token) -> Result<(), String> {
    match (kind, token) {
        (ParamType::Uint(bits), Token::Uint(value)) => {
            if value.bits() > *bits {
                Err(format!("value {} needs {} bits", value, value.bits()))
            } else {
                Ok(())
            }
        }
        (ParamType::Int(_), Token::Int(_))
        | (ParamType::Address, Token::Address(_))
        | (ParamType::Bool, Token::Bool(_))
        | (ParamType::Bytes, Token::Bytes(_))
        | (ParamType::String, Token::String(_)) => Ok(()),
        (ParamType::FixedBytes(len), Token::FixedBytes(bytes)) => {
            if bytes.len() == *len {
                Ok(())
            } else {
                Err(format!("expected {} bytes, got {}", len, bytes.len()))
            }
        }
        (ParamType::Array(inner), Token::Array(items)) => {
            items.iter().try_for_each(|item| check_token(inner, item))
        }
        (ParamType::FixedArray(inner, len), Token::FixedArray(items)) => {
            if items.len() != *len {
                return Err(format!("expected {} elements, got {}", len, items.len()));
            }
            items.iter().try_for_each(|item| check_token(inner, item))
        }
        (ParamType::Tuple(kinds), Token::Tuple(items)) => {
            if kinds.len() != items.len() {
                return Err(format!(
                    "expected {} tuple fields, got {}",
                    kinds.len(),
                    items.len()
                ));
            }
            kinds
                .iter()
                .zip(items)
                .try_for_each(|(k, item)| check_token(k, item))
        }
        (_, other) => Err(format!("got {:?}", other)),
    }
}

/// Read a token as an unsigned integer
pub fn token_to_uint(token: &Token) -> VaultResult<ethers::types::U256> {
    token
        .clone()
        .into_uint()
        .ok_or_else(|| VaultError::Abi(format!("expected an integer, got {:?}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, U256};

    #[test]
    fn test_approve_tx_round_trip() {
        let encoder = ContractCallEncoder::new(Interface::Legacy);
        let data = encoder
            .encode("approveTx", &[Token::Uint(42.into()), Token::Uint(7.into())])
            .unwrap();
        assert_eq!(data.len(), 4 + 2 * 32);

        let decoded = encoder.decode_input("approveTx", &data).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("txid".to_string(), Token::Uint(42.into())),
                ("_nonce".to_string(), Token::Uint(7.into())),
            ]
        );
    }

    #[test]
    fn test_unknown_function_per_interface() {
        let legacy = ContractCallEncoder::new(Interface::Legacy);
        let err = legacy
            .encode(
                "trackToken",
                &[
                    Token::Address(Address::zero()),
                    Token::Address(Address::zero()),
                    Token::Uint(0.into()),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, VaultError::UnknownFunction { .. }));

        assert!(Interface::V2.function("trackToken").is_ok());
        assert!(Interface::V2.function("approveTx").is_err());
        assert!(Interface::Legacy.function("submitRawTx").is_ok());
    }

    #[test]
    fn test_rejects_overwide_threshold() {
        let encoder = ContractCallEncoder::new(Interface::Legacy);
        let err = encoder
            .encode(
                "newProposal",
                &[
                    Token::Address(Address::repeat_byte(0x11)),
                    Token::Uint(U256::exp10(17)),
                    Token::Uint(256.into()),
                    Token::Uint(3.into()),
                ],
            )
            .unwrap_err();
        match err {
            VaultError::InvalidArgumentWidth { param, expected, .. } => {
                assert_eq!(param, "_threshold");
                assert_eq!(expected, "uint8");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_nonce_beyond_u32() {
        let encoder = ContractCallEncoder::new(Interface::Legacy);
        let err = encoder
            .encode(
                "deleteTx",
                &[Token::Uint(1.into()), Token::Uint(U256::from(u32::MAX) + 1)],
            )
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidArgumentWidth { .. }));
    }

    #[test]
    fn test_rejects_wrong_arity_and_type() {
        let encoder = ContractCallEncoder::new(Interface::Legacy);
        assert!(matches!(
            encoder.encode("approveTx", &[Token::Uint(1.into())]),
            Err(VaultError::InvalidArgument(_))
        ));
        assert!(matches!(
            encoder.encode(
                "approveTx",
                &[Token::Address(Address::zero()), Token::Uint(1.into())]
            ),
            Err(VaultError::InvalidArgumentWidth { .. })
        ));
    }

    #[test]
    fn test_decode_output_uint() {
        let encoder = ContractCallEncoder::new(Interface::Erc20);
        let mut word = [0u8; 32];
        word[31] = 6;
        let tokens = encoder.decode_output("decimals", &word).unwrap();
        assert_eq!(token_to_uint(&tokens[0]).unwrap(), U256::from(6));
    }
}
