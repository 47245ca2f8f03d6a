//! ABI surface of the multisend contract and the ERC-20 functions it relies on.

use crate::error::MultisendError;
use crate::wallet::ContractCall;
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::prelude::*;

/// Multisend contract deployed on Base mainnet.
pub const DEFAULT_MULTISEND_ADDRESS: &str = "0x883f9868C5D44B16949ffF77fe56c4d9A9C2cfbD";

pub const MULTISEND_ETH: &str = "multisendETH";
pub const MULTISEND_TOKEN: &str = "multisendToken";
pub const APPROVE: &str = "approve";
pub const ALLOWANCE: &str = "allowance";
pub const DECIMALS: &str = "decimals";

fn param(name: &str, kind: ParamType) -> Param {
    Param {
        name: name.to_string(),
        kind,
        internal_type: None,
    }
}

fn address_array() -> ParamType {
    ParamType::Array(Box::new(ParamType::Address))
}

fn uint_array() -> ParamType {
    ParamType::Array(Box::new(ParamType::Uint(256)))
}

/// function multisendETH(address[] recipients, uint256[] values) external payable
#[allow(deprecated)]
fn multisend_eth_function() -> Function {
    Function {
        name: MULTISEND_ETH.to_string(),
        inputs: vec![param("recipients", address_array()), param("values", uint_array())],
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// function multisendToken(address token, address[] recipients, uint256[] values) external
#[allow(deprecated)]
fn multisend_token_function() -> Function {
    Function {
        name: MULTISEND_TOKEN.to_string(),
        inputs: vec![
            param("token", ParamType::Address),
            param("recipients", address_array()),
            param("values", uint_array()),
        ],
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}

/// function approve(address spender, uint256 amount) external returns (bool)
#[allow(deprecated)]
fn approve_function() -> Function {
    Function {
        name: APPROVE.to_string(),
        inputs: vec![param("spender", ParamType::Address), param("amount", ParamType::Uint(256))],
        outputs: vec![param("", ParamType::Bool)],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}

/// function allowance(address owner, address spender) external view returns (uint256)
#[allow(deprecated)]
fn allowance_function() -> Function {
    Function {
        name: ALLOWANCE.to_string(),
        inputs: vec![param("owner", ParamType::Address), param("spender", ParamType::Address)],
        outputs: vec![param("", ParamType::Uint(256))],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

/// function decimals() external view returns (uint8)
#[allow(deprecated)]
fn decimals_function() -> Function {
    Function {
        name: DECIMALS.to_string(),
        inputs: vec![],
        outputs: vec![param("", ParamType::Uint(8))],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

fn encode(func: &Function, args: &[Token], function: &'static str) -> Result<Bytes, MultisendError> {
    func.encode_input(args).map(Bytes::from).map_err(|e| MultisendError::Encoding {
        function,
        reason: e.to_string(),
    })
}

fn address_tokens(addresses: &[Address]) -> Token {
    Token::Array(addresses.iter().map(|a| Token::Address(*a)).collect())
}

fn uint_tokens(values: &[U256]) -> Token {
    Token::Array(values.iter().map(|v| Token::Uint(*v)).collect())
}

/// Parse recipient strings into addresses, reporting the first bad entry.
pub fn parse_recipients(recipients: &[String]) -> Result<Vec<Address>, MultisendError> {
    recipients
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            raw.parse::<Address>().map_err(|_| MultisendError::InvalidRecipient {
                position: idx + 1,
                value: raw.clone(),
            })
        })
        .collect()
}

/// `multisendETH` call carrying `total` as the native payment.
pub fn multisend_eth_call(
    contract: Address,
    recipients: &[Address],
    values: &[U256],
    total: U256,
) -> Result<ContractCall, MultisendError> {
    let calldata = encode(
        &multisend_eth_function(),
        &[address_tokens(recipients), uint_tokens(values)],
        MULTISEND_ETH,
    )?;
    Ok(ContractCall {
        to: contract,
        function: MULTISEND_ETH,
        calldata,
        value: Some(total),
    })
}

pub fn multisend_token_call(
    contract: Address,
    token: Address,
    recipients: &[Address],
    values: &[U256],
) -> Result<ContractCall, MultisendError> {
    let calldata = encode(
        &multisend_token_function(),
        &[Token::Address(token), address_tokens(recipients), uint_tokens(values)],
        MULTISEND_TOKEN,
    )?;
    Ok(ContractCall {
        to: contract,
        function: MULTISEND_TOKEN,
        calldata,
        value: None,
    })
}

/// `token.approve(spender, amount)`.
pub fn approve_call(token: Address, spender: Address, amount: U256) -> Result<ContractCall, MultisendError> {
    let calldata = encode(
        &approve_function(),
        &[Token::Address(spender), Token::Uint(amount)],
        APPROVE,
    )?;
    Ok(ContractCall {
        to: token,
        function: APPROVE,
        calldata,
        value: None,
    })
}

pub fn encode_allowance(owner: Address, spender: Address) -> Result<Bytes, MultisendError> {
    encode(
        &allowance_function(),
        &[Token::Address(owner), Token::Address(spender)],
        ALLOWANCE,
    )
}

pub fn encode_decimals() -> Result<Bytes, MultisendError> {
    encode(&decimals_function(), &[], DECIMALS)
}

fn decode_single_uint(func: &Function, output: &[u8]) -> Option<U256> {
    match func.decode_output(output).ok()?.into_iter().next()? {
        Token::Uint(value) => Some(value),
        _ => None,
    }
}

pub fn decode_allowance(output: &[u8]) -> Option<U256> {
    decode_single_uint(&allowance_function(), output)
}

pub fn decode_decimals(output: &[u8]) -> Option<u8> {
    let value = decode_single_uint(&decimals_function(), output)?;
    (value <= U256::from(u8::MAX)).then(|| value.as_u32() as u8)
}

/// Amount argument of an encoded `approve` call.
pub fn decode_approve_amount(calldata: &[u8]) -> Option<U256> {
    let tokens = approve_function().decode_input(calldata.get(4..)?).ok()?;
    match tokens.get(1)? {
        Token::Uint(amount) => Some(*amount),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Address {
        DEFAULT_MULTISEND_ADDRESS.parse().unwrap()
    }

    #[test]
    fn test_default_address_parses() {
        assert_ne!(contract(), Address::zero());
    }

    #[test]
    fn test_selectors_match_signatures() {
        assert_eq!(multisend_eth_function().short_signature(), ethers::utils::id("multisendETH(address[],uint256[])"));
        assert_eq!(
            multisend_token_function().short_signature(),
            ethers::utils::id("multisendToken(address,address[],uint256[])")
        );
        assert_eq!(approve_function().short_signature(), [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(allowance_function().short_signature(), [0xdd, 0x62, 0xed, 0x3e]);
        assert_eq!(decimals_function().short_signature(), [0x31, 0x3c, 0xe5, 0x67]);
    }

    #[test]
    fn test_parse_recipients_reports_position() {
        let raw = vec![
            "0x1111111111111111111111111111111111111111".to_string(),
            "0xnope".to_string(),
        ];
        match parse_recipients(&raw) {
            Err(MultisendError::InvalidRecipient { position, value }) => {
                assert_eq!(position, 2);
                assert_eq!(value, "0xnope");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_multisend_eth_call_carries_total() {
        let recipients = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let values = vec![U256::from(1u64), U256::from(2u64)];
        let call = multisend_eth_call(contract(), &recipients, &values, U256::from(3u64)).unwrap();
        assert_eq!(call.function, MULTISEND_ETH);
        assert_eq!(call.value, Some(U256::from(3u64)));
        assert_eq!(&call.calldata[..4], &multisend_eth_function().short_signature());
        // selector + 2 offsets + (len + 2 items) * 2
        assert_eq!(call.calldata.len(), 4 + 32 * 8);
    }

    #[test]
    fn test_multisend_token_call_has_no_value() {
        let call = multisend_token_call(
            contract(),
            Address::repeat_byte(9),
            &[Address::repeat_byte(1)],
            &[U256::from(5u64)],
        )
        .unwrap();
        assert_eq!(call.function, MULTISEND_TOKEN);
        assert_eq!(call.to, contract());
        assert!(call.value.is_none());
    }

    #[test]
    fn test_approve_call_targets_token() {
        let token = Address::repeat_byte(9);
        let call = approve_call(token, contract(), U256::from(700u64)).unwrap();
        assert_eq!(call.to, token);
        assert_eq!(decode_approve_amount(&call.calldata), Some(U256::from(700u64)));
    }

    #[test]
    fn test_decode_allowance_and_decimals() {
        let mut word = [0u8; 32];
        word[31] = 6;
        assert_eq!(decode_decimals(&word), Some(6));
        assert_eq!(decode_allowance(&word), Some(U256::from(6u64)));
        assert_eq!(decode_allowance(&[]), None);
    }
}
