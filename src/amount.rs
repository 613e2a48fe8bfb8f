use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest scale a `U256` can represent with at least one whole digit.
pub const MAX_DECIMALS: u8 = 77;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Empty amount")]
    Empty,

    #[error("Invalid amount '{0}': expected digits with an optional fractional part")]
    Malformed(String),

    #[error("Amount '{value}' has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u8 },

    #[error("Amount '{0}' does not fit in 256 bits")]
    Overflow(String),

    #[error("Amount must be greater than 0")]
    Zero,

    #[error("Unsupported token decimals: {0}")]
    UnsupportedDecimals(u8),
}

/// Token quantity in ledger units together with the token's scale.
///
/// All conversions go through integer arithmetic, so a decimal string
/// parsed with `parse` and rendered with `to_decimal_string` keeps its
/// exact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub raw: U256,
    pub decimals: u8,
}

impl AssetAmount {
    pub fn from_raw(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self {
            raw: U256::zero(),
            decimals,
        }
    }

    /// Parse a human-entered decimal such as `"10.5"` into ledger units.
    pub fn parse(value: &str, decimals: u8) -> Result<Self, AmountError> {
        Ok(Self {
            raw: parse_units(value, decimals)?,
            decimals,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    pub fn to_decimal_string(&self) -> String {
        format_units(self.raw, self.decimals)
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

/// Convert a decimal string to integer units scaled by `10^decimals`.
pub fn parse_units(value: &str, decimals: u8) -> Result<U256, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (value, ""),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) || (whole.is_empty() && frac.is_empty()) {
        return Err(AmountError::Malformed(value.to_string()));
    }

    let scale = decimals as usize;
    let frac = if frac.len() > scale {
        let (kept, excess) = frac.split_at(scale);
        if excess.bytes().any(|b| b != b'0') {
            return Err(AmountError::TooPrecise {
                value: value.to_string(),
                decimals,
            });
        }
        kept.to_string()
    } else {
        format!("{:0<width$}", frac, width = scale)
    };

    let digits = format!("{}{}", whole, frac);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }

    U256::from_dec_str(digits).map_err(|_| AmountError::Overflow(value.to_string()))
}

/// Render integer units as a decimal string with trailing zeros removed.
///
/// A zero amount renders as `"0"` and whole amounts carry no fractional part.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    let scale = decimals as usize;
    if scale == 0 {
        return digits;
    }

    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (whole, frac) = padded.split_at(padded.len() - scale);
    let frac = frac.trim_end_matches('0');

    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}
