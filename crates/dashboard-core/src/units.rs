//! ============================================================================
//! Unit Conversion - human-readable amounts <-> on-chain fixed-point integers
//! ============================================================================
//! Token amounts on chain are integers scaled by 10^decimals. Conversions use
//! u128 arithmetic so 18- and 24-decimal tokens keep full precision.
//! ============================================================================

use thiserror::Error;

/// Decimals of the OCT token
pub const OCT_DECIMALS: u8 = 18;

/// Decimals of NEAR (yoctoNEAR)
pub const NEAR_DECIMALS: u8 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("malformed amount: {0}")]
    Malformed(String),

    #[error("amount {0} does not fit in 128 bits")]
    Overflow(String),

    #[error("unsupported decimals: {0}")]
    Decimals(u8),
}

fn scale(decimals: u8) -> Result<u128, AmountError> {
    10u128
        .checked_pow(decimals as u32)
        .ok_or(AmountError::Decimals(decimals))
}

/// Parse "1.5" into 1.5 * 10^decimals. Fraction digits past `decimals` are dropped.
pub fn parse_amount(text: &str, decimals: u8) -> Result<u128, AmountError> {
    let text = text.trim().replace(',', "");
    if text.is_empty() {
        return Err(AmountError::Empty);
    }

    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text.as_str(), ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::Malformed(text.clone()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::Malformed(text.clone()));
    }

    let unit = scale(decimals)?;

    let whole: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| AmountError::Overflow(text.clone()))?
    };

    let kept: String = frac_part.chars().take(decimals as usize).collect();
    let fraction: u128 = if kept.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", kept, width = decimals as usize);
        padded
            .parse()
            .map_err(|_| AmountError::Overflow(text.clone()))?
    };

    whole
        .checked_mul(unit)
        .and_then(|w| w.checked_add(fraction))
        .ok_or(AmountError::Overflow(text))
}

/// Render a raw amount with all significant fraction digits, trailing zeros trimmed
pub fn format_amount(raw: u128, decimals: u8) -> String {
    let unit = match scale(decimals) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };
    let whole = raw / unit;
    let fraction = raw % unit;

    if fraction == 0 {
        return whole.to_string();
    }

    let digits = format!("{:0>width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Render with at most `precision` fraction digits, rounding down
pub fn format_amount_with_precision(raw: u128, decimals: u8, precision: u8) -> String {
    if precision >= decimals {
        return format_amount(raw, decimals);
    }
    let drop = match scale(decimals - precision) {
        Ok(d) => d,
        Err(_) => return format_amount(raw, decimals),
    };
    format_amount(raw - raw % drop, decimals)
}
