use thiserror::Error;

/// Errors raised while reading integer amounts out of explorer payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("`{0}` is not a valid hex quantity")]
    InvalidHex(String),
    #[error("`{0}` is not a valid decimal integer")]
    InvalidDecimal(String),
    #[error("`{0}` does not fit into 128 bits")]
    Overflow(String),
}

/// Converts an integer amount of the smallest chain unit into whole units.
pub fn scale_units(raw: u128, decimals: u32) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Parses a JSON-RPC quantity (`0x`-prefixed, big-endian hex) into `u128`.
pub fn parse_hex_quantity(value: &str) -> Result<u128, UnitError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        if digits.chars().all(|c| c == '0') {
            return Ok(0);
        }
        return Err(UnitError::InvalidHex(value.to_string()));
    }
    if !significant.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UnitError::InvalidHex(value.to_string()));
    }
    if significant.len() > 32 {
        return Err(UnitError::Overflow(value.to_string()));
    }
    u128::from_str_radix(significant, 16).map_err(|_| UnitError::InvalidHex(value.to_string()))
}

/// Parses a base-10 integer string such as Etherscan's `value` field.
pub fn parse_decimal_units(value: &str) -> Result<u128, UnitError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(UnitError::InvalidDecimal(value.to_string()));
    }
    trimmed
        .parse::<u128>()
        .map_err(|_| UnitError::Overflow(value.to_string()))
}
