//! Pre-submission checks. Pure: no calls, no logging of user data.

use crate::error::ValidationError;
use crate::types::{SessionInfo, TransferKind, TransferRequest, ValidRequest};

/// Address prefix every EVM address string starts with.
pub const ADDRESS_PREFIX: &str = "0x";

/// Check a normalized request against the current session.
///
/// Checks run in a fixed order and the first failure wins: connection,
/// network, empty lists, count mismatch, token address. Recipient strings are
/// not inspected here; malformed ones are refused when the call is encoded.
pub fn validate(
    session: &SessionInfo,
    target_chain_id: u64,
    request: TransferRequest,
) -> Result<ValidRequest, ValidationError> {
    if !session.is_connected() {
        return Err(ValidationError::NotConnected);
    }

    match session.chain_id {
        Some(id) if id == target_chain_id => {}
        other => {
            return Err(ValidationError::WrongNetwork {
                expected: target_chain_id,
                actual: other.unwrap_or_default(),
            })
        }
    }

    if request.recipients.is_empty() || request.amounts.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    if request.recipients.len() != request.amounts.len() {
        return Err(ValidationError::CountMismatch(
            request.recipients.len(),
            request.amounts.len(),
        ));
    }

    if request.kind == TransferKind::Token {
        let well_formed = request
            .token_address
            .as_deref()
            .is_some_and(|addr| addr.starts_with(ADDRESS_PREFIX));
        if !well_formed {
            return Err(ValidationError::InvalidTokenAddress);
        }
    }

    Ok(ValidRequest::new(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    const BASE: u64 = 8453;

    fn session() -> SessionInfo {
        SessionInfo::connected(Address::repeat_byte(0x11), BASE)
    }

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_accepts_matching_eth_request() {
        let request = TransferRequest::eth(list(&["0xa", "0xb"]), list(&["0.1", "0.2"]));
        let valid = validate(&session(), BASE, request).unwrap();
        assert_eq!(valid.len(), 2);
        assert_eq!(valid.kind(), TransferKind::Eth);
    }

    #[test]
    fn test_validate_not_connected_wins_over_everything() {
        let request = TransferRequest::eth(vec![], vec![]);
        let result = validate(&SessionInfo::default(), BASE, request);
        assert_eq!(result, Err(ValidationError::NotConnected));
    }

    #[test]
    fn test_validate_wrong_network() {
        let request = TransferRequest::eth(list(&["0xa"]), list(&["1"]));
        let on_mainnet = SessionInfo::connected(Address::zero(), 1);
        assert_eq!(
            validate(&on_mainnet, BASE, request),
            Err(ValidationError::WrongNetwork { expected: BASE, actual: 1 })
        );
    }

    #[test]
    fn test_validate_unknown_chain_is_wrong_network() {
        let request = TransferRequest::eth(list(&["0xa"]), list(&["1"]));
        let unknown = SessionInfo {
            account: Some(Address::zero()),
            chain_id: None,
        };
        assert!(matches!(
            validate(&unknown, BASE, request),
            Err(ValidationError::WrongNetwork { actual: 0, .. })
        ));
    }

    #[test]
    fn test_validate_empty_lists() {
        let no_amounts = TransferRequest::eth(list(&["0xa"]), vec![]);
        assert_eq!(validate(&session(), BASE, no_amounts), Err(ValidationError::EmptyInput));
        let no_recipients = TransferRequest::eth(vec![], list(&["1"]));
        assert_eq!(validate(&session(), BASE, no_recipients), Err(ValidationError::EmptyInput));
    }

    #[test]
    fn test_validate_count_mismatch() {
        let request = TransferRequest::eth(list(&["0xa", "0xb", "0xc"]), list(&["1", "2"]));
        assert_eq!(
            validate(&session(), BASE, request),
            Err(ValidationError::CountMismatch(3, 2))
        );
    }

    #[test]
    fn test_validate_count_mismatch_various_lengths() {
        for (a, b) in [(1usize, 2usize), (5, 4), (10, 1)] {
            let addrs = (0..a).map(|i| format!("0x{:x}", i)).collect();
            let amts = (0..b).map(|i| i.to_string()).collect();
            let result = validate(&session(), BASE, TransferRequest::eth(addrs, amts));
            assert_eq!(result, Err(ValidationError::CountMismatch(a, b)));
        }
    }

    #[test]
    fn test_validate_token_requires_address() {
        let mut request = TransferRequest::token("", list(&["0xa"]), list(&["1"]));
        request.token_address = None;
        assert_eq!(
            validate(&session(), BASE, request),
            Err(ValidationError::InvalidTokenAddress)
        );
    }

    #[test]
    fn test_validate_token_requires_prefix() {
        let request = TransferRequest::token("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", list(&["0xa"]), list(&["1"]));
        assert_eq!(
            validate(&session(), BASE, request),
            Err(ValidationError::InvalidTokenAddress)
        );
    }

    #[test]
    fn test_validate_eth_ignores_token_field() {
        let mut request = TransferRequest::eth(list(&["0xa"]), list(&["1"]));
        request.token_address = Some("garbage".to_string());
        assert!(validate(&session(), BASE, request).is_ok());
    }

    #[test]
    fn test_validate_does_not_check_recipient_format() {
        let request = TransferRequest::eth(list(&["not-an-address"]), list(&["1"]));
        assert!(validate(&session(), BASE, request).is_ok());
    }
}
