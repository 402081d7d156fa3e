//! Date parsing for statement fields.
//!
//! Statements print ISO dates, `MM/DD/YYYY` (US platforms) and
//! `DD/MM/YYYY` (iFood, Rappi). Numeric dates are disambiguated by the
//! vendor's locale unless a component value settles it outright.

use chrono::NaiveDate;
use thiserror::Error;

/// Component order for ambiguous numeric dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    DayFirst,
    MonthFirst,
}

#[derive(Debug, Error, PartialEq)]
pub enum DateParseError {
    #[error("date '{0}' is empty or not in a recognized format")]
    Unrecognized(String),

    #[error("date '{0}' has out-of-range components")]
    OutOfRange(String),
}

/// Parse a statement date, tolerating ISO-8601 and locale formats.
///
/// Tries `YYYY-MM-DD` first, then three-component numeric dates split
/// on `/`, `-` or `.`. A component greater than 12 forces its position
/// to be the day; otherwise `order` decides.
pub fn parse_date(input: &str, order: DateOrder) -> Result<NaiveDate, DateParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DateParseError::Unrecognized(input.to_string()));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }

    let parts: Vec<&str> = trimmed
        .split(['/', '-', '.'])
        .map(str::trim)
        .collect();
    if parts.len() != 3 {
        return Err(DateParseError::Unrecognized(input.to_string()));
    }

    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| DateParseError::Unrecognized(input.to_string()))?;

    // `YYYY/MM/DD` with any separator.
    if parts[0].len() == 4 {
        return NaiveDate::from_ymd_opt(nums[0] as i32, nums[1], nums[2])
            .ok_or_else(|| DateParseError::OutOfRange(input.to_string()));
    }

    if parts[2].len() != 4 {
        return Err(DateParseError::Unrecognized(input.to_string()));
    }
    let year = nums[2] as i32;
    let (a, b) = (nums[0], nums[1]);

    let (day, month) = if a > 12 {
        (a, b)
    } else if b > 12 {
        (b, a)
    } else {
        match order {
            DateOrder::DayFirst => (a, b),
            DateOrder::MonthFirst => (b, a),
        }
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DateParseError::OutOfRange(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_dates_parse_regardless_of_order() {
        assert_eq!(
            parse_date("2026-01-21", DateOrder::DayFirst).unwrap(),
            ymd(2026, 1, 21)
        );
        assert_eq!(
            parse_date("2026-01-21", DateOrder::MonthFirst).unwrap(),
            ymd(2026, 1, 21)
        );
    }

    #[test]
    fn locale_decides_ambiguous_dates() {
        // 03/04 is April 3rd in Brazil, March 4th in the US.
        assert_eq!(
            parse_date("03/04/2026", DateOrder::DayFirst).unwrap(),
            ymd(2026, 4, 3)
        );
        assert_eq!(
            parse_date("03/04/2026", DateOrder::MonthFirst).unwrap(),
            ymd(2026, 3, 4)
        );
    }

    #[test]
    fn large_component_overrides_locale() {
        // 21 cannot be a month, so 21/01 is day-first even for US vendors.
        assert_eq!(
            parse_date("21/01/2026", DateOrder::MonthFirst).unwrap(),
            ymd(2026, 1, 21)
        );
        assert_eq!(
            parse_date("01/21/2026", DateOrder::DayFirst).unwrap(),
            ymd(2026, 1, 21)
        );
    }

    #[test]
    fn alternate_separators() {
        assert_eq!(
            parse_date("21.01.2026", DateOrder::DayFirst).unwrap(),
            ymd(2026, 1, 21)
        );
        assert_eq!(
            parse_date("2026/01/21", DateOrder::MonthFirst).unwrap(),
            ymd(2026, 1, 21)
        );
    }

    #[test]
    fn rejects_nonsense() {
        assert!(parse_date("", DateOrder::DayFirst).is_err());
        assert!(parse_date("soon", DateOrder::DayFirst).is_err());
        assert!(parse_date("13/13/2026", DateOrder::DayFirst).is_err());
        assert!(matches!(
            parse_date("32/01/2026", DateOrder::DayFirst),
            Err(DateParseError::OutOfRange(_))
        ));
    }
}
