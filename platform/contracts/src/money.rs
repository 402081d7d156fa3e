//! Locale-tolerant parsing of monetary amounts into exact decimals.
//!
//! Scanned statements mix `1,234.56` (period-decimal) and `1.234,56`
//! (comma-decimal). Amounts are normalized into [`rust_decimal::Decimal`];
//! binary floating point is never used for money.

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AmountParseError {
    #[error("amount is empty")]
    Empty,

    #[error("amount '{0}' contains no digits")]
    NoDigits(String),

    #[error("amount '{0}' is not a valid decimal")]
    Malformed(String),
}

/// Parse a monetary amount, accepting both decimal-separator conventions.
///
/// Currency markers (`$`, `R$`, `COP`, whitespace) are ignored. When both
/// `.` and `,` appear, the right-most separator is the decimal point.
/// A lone separator followed by exactly three digits is read as a
/// thousands separator (`1.234` → 1234), matching how the statements
/// print whole amounts.
pub fn parse_amount(input: &str) -> Result<Decimal, AmountParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountParseError::Empty);
    }

    // Keep digits, separators and the sign; drop currency symbols and letters.
    let mut cleaned = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '0'..='9' | '.' | ',' => cleaned.push(c),
            '-' if cleaned.is_empty() => cleaned.push(c),
            _ => {}
        }
    }

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return Err(AmountParseError::NoDigits(input.to_string()));
    }

    let normalized = normalize_separators(&cleaned);

    Decimal::from_str(&normalized).map_err(|_| AmountParseError::Malformed(input.to_string()))
}

/// Rewrite `cleaned` (digits, `.`, `,`, optional leading `-`) into a
/// plain `1234.56` form.
fn normalize_separators(cleaned: &str) -> String {
    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let decimal_sep = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            // Both conventions present: the right-most separator is decimal.
            if d > c {
                Some('.')
            } else {
                Some(',')
            }
        }
        (Some(d), None) => lone_separator_role(cleaned, '.', d),
        (None, Some(c)) => lone_separator_role(cleaned, ',', c),
        (None, None) => None,
    };

    let mut out = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        match c {
            '.' | ',' => {
                if Some(c) == decimal_sep {
                    out.push('.');
                }
                // Thousands separators are dropped.
            }
            other => out.push(other),
        }
    }
    out
}

/// Decide whether a single separator kind is the decimal point or a
/// thousands separator. Returns the separator char when it is decimal.
fn lone_separator_role(cleaned: &str, sep: char, last_idx: usize) -> Option<char> {
    let occurrences = cleaned.matches(sep).count();
    if occurrences > 1 {
        // `1.234.567`: grouping only.
        return None;
    }

    let fractional_digits = cleaned.len() - last_idx - 1;
    if fractional_digits == 3 {
        // `1,234` / `1.234`: grouping by convention.
        None
    } else {
        Some(sep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(s: &str) -> Decimal {
        parse_amount(s).unwrap()
    }

    #[test]
    fn period_decimal_convention() {
        assert_eq!(parsed("1,234.56"), Decimal::from_str("1234.56").unwrap());
        assert_eq!(parsed("0.30"), Decimal::from_str("0.30").unwrap());
        assert_eq!(parsed("12.5"), Decimal::from_str("12.5").unwrap());
    }

    #[test]
    fn comma_decimal_convention() {
        assert_eq!(parsed("1.234,56"), Decimal::from_str("1234.56").unwrap());
        assert_eq!(parsed("89,90"), Decimal::from_str("89.90").unwrap());
    }

    #[test]
    fn lone_separator_with_three_digits_is_grouping() {
        assert_eq!(parsed("1,234"), Decimal::from_str("1234").unwrap());
        assert_eq!(parsed("1.234"), Decimal::from_str("1234").unwrap());
        assert_eq!(parsed("1.234.567"), Decimal::from_str("1234567").unwrap());
    }

    #[test]
    fn currency_markers_are_ignored() {
        assert_eq!(parsed("$1,234.56"), Decimal::from_str("1234.56").unwrap());
        assert_eq!(parsed("R$ 1.234,56"), Decimal::from_str("1234.56").unwrap());
        assert_eq!(parsed("COP 45.000"), Decimal::from_str("45000").unwrap());
    }

    #[test]
    fn negative_amounts_keep_sign() {
        assert_eq!(parsed("-12.50"), Decimal::from_str("-12.50").unwrap());
    }

    #[test]
    fn round_trip_preserves_two_fraction_digits() {
        for s in ["0.01", "10.00", "1234.56", "99999999.99"] {
            let d = parsed(s);
            assert_eq!(d.round_dp(2).to_string(), s);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_amount(""), Err(AmountParseError::Empty));
        assert!(matches!(
            parse_amount("N/A"),
            Err(AmountParseError::NoDigits(_))
        ));
        assert!(matches!(
            parse_amount("1.2.3,4,5"),
            Err(AmountParseError::Malformed(_))
        ));
    }
}
