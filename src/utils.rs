use crate::error::AmountError;
use ethers::types::U256;

/// Decimals of the native currency (wei).
pub const NATIVE_DECIMALS: u8 = 18;

/// Decimals assumed for a token whose `decimals()` cannot be read.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

pub fn format_ether(wei: U256) -> String {
    format_units(wei, NATIVE_DECIMALS)
}

/// Render a base-unit value as a decimal string without trailing zeros.
pub fn format_units(value: U256, decimals: u8) -> String {
    let raw = ethers::utils::format_units(value, decimals as u32).unwrap_or_else(|_| value.to_string());
    if raw.contains('.') {
        raw.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        raw
    }
}

/// Convert a human decimal string into base units for `decimals`.
///
/// The conversion is exact: fractional digits beyond `decimals` are rejected
/// unless they are trailing zeros. Signs, exponents and separators are rejected.
pub fn to_base_units(input: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_digit() && *c != '.') {
        return Err(AmountError::InvalidCharacter(bad));
    }

    let mut parts = trimmed.split('.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(AmountError::MultipleDecimalPoints);
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::NoDigits);
    }

    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.len() > decimals as usize {
        return Err(AmountError::TooManyDecimals {
            decimals,
            found: frac_part.len(),
        });
    }

    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    digits.extend(std::iter::repeat('0').take(decimals as usize - frac_part.len()));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(digits).map_err(|_| AmountError::Overflow)
}

/// Sum base-unit values. Overflow is reported rather than wrapped.
pub fn sum(amounts: &[U256]) -> Result<U256, AmountError> {
    amounts
        .iter()
        .try_fold(U256::zero(), |acc, x| acc.checked_add(*x))
        .ok_or(AmountError::Overflow)
}

/// Shorten a hex string for log lines and summaries: `0x1234…abcd`.
pub fn short_hex(full: &str) -> String {
    let chars: Vec<char> = full.chars().collect();
    if chars.len() <= 12 {
        return full.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
