//! Invoice validation: schema constraints and business rules in one pass.
//!
//! Every boundary that accepts an [`Invoice`] (extractor output,
//! warehouse writer input, CLI `validate`) runs the same rule list.
//! Arithmetic cross-checks use exact decimals with a two-cent tolerance
//! for OCR-era rounding drift.

use crate::invoice::{Invoice, LineItem, VendorType};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

lazy_static! {
    static ref INVOICE_ID_RE: Regex = Regex::new(r"^[A-Z0-9\-]+$").unwrap();
    static ref CURRENCY_RE: Regex = Regex::new(r"^[A-Z]{3}$").unwrap();
}

/// Tolerance for cross-field money checks (commission, subtotal).
fn money_tolerance() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

/// Tolerance for per-line `quantity * unit_price` checks.
fn line_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// Validation errors for extracted invoices
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("invoice_id '{0}' must match [A-Z0-9-]+ and be non-empty")]
    InvalidInvoiceId(String),

    #[error("vendor_name must be non-empty")]
    EmptyVendorName,

    #[error("currency '{0}' must be a 3-letter uppercase ISO 4217 code")]
    InvalidCurrency(String),

    #[error("invoice_date {invoice_date} is after due_date {due_date}")]
    DateOrderViolation {
        invoice_date: chrono::NaiveDate,
        due_date: chrono::NaiveDate,
    },

    #[error("{field} must be non-negative, got {value}")]
    NegativeAmount { field: &'static str, value: Decimal },

    #[error("commission_rate must be within [0, 1], got {0}")]
    CommissionRateOutOfRange(Decimal),

    #[error("commission_amount {actual} differs from subtotal * rate = {expected} by more than 0.02")]
    CommissionMismatch { expected: Decimal, actual: Decimal },

    #[error("line_items sum to {line_total} but subtotal is {subtotal} (tolerance 0.02)")]
    SubtotalMismatch {
        line_total: Decimal,
        subtotal: Decimal,
    },

    #[error("total_amount must be positive, got {0}")]
    NonPositiveTotal(Decimal),

    #[error("invoice must carry at least one line item")]
    NoLineItems,

    #[error("line {index}: description must be non-empty")]
    EmptyLineDescription { index: usize },

    #[error("line {index}: {field} must be non-negative, got {value}")]
    NegativeLineAmount {
        index: usize,
        field: &'static str,
        value: Decimal,
    },

    #[error("line {index}: amount {actual} differs from quantity * unit_price = {expected} by more than 0.01")]
    LineAmountMismatch {
        index: usize,
        expected: Decimal,
        actual: Decimal,
    },

    #[error("vendor_type '{actual}' does not match classifier-assigned '{expected}'")]
    VendorMismatch {
        expected: VendorType,
        actual: VendorType,
    },
}

/// Validate an invoice against schema constraints and business rules.
///
/// # Validation Rules
///
/// - `invoice_id`: non-empty, matches `[A-Z0-9-]+`
/// - `vendor_name`: non-empty
/// - `currency`: 3-letter uppercase code (ISO 4217)
/// - `invoice_date <= due_date`
/// - `subtotal`, `tax_amount`, `commission_amount`: >= 0
/// - `commission_rate`: within [0, 1]
/// - `|commission_amount - subtotal * commission_rate| <= 0.02`
/// - `|sum of line amounts - subtotal| <= 0.02`
/// - `total_amount > 0`
/// - >= 1 line item; each line: non-empty description, non-negative
///   quantity/unit_price/amount, `|amount - quantity * unit_price| <= 0.01`
/// - when `expected_vendor` is given (the classifier's verdict), the
///   invoice's `vendor_type` must agree
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate_invoice(
    invoice: &Invoice,
    expected_vendor: Option<VendorType>,
) -> Result<(), ValidationError> {
    if invoice.invoice_id.is_empty() || !INVOICE_ID_RE.is_match(&invoice.invoice_id) {
        return Err(ValidationError::InvalidInvoiceId(
            invoice.invoice_id.clone(),
        ));
    }

    if invoice.vendor_name.trim().is_empty() {
        return Err(ValidationError::EmptyVendorName);
    }

    if let Some(expected) = expected_vendor {
        if invoice.vendor_type != expected {
            return Err(ValidationError::VendorMismatch {
                expected,
                actual: invoice.vendor_type,
            });
        }
    }

    if !CURRENCY_RE.is_match(&invoice.currency) {
        return Err(ValidationError::InvalidCurrency(invoice.currency.clone()));
    }

    if invoice.invoice_date > invoice.due_date {
        return Err(ValidationError::DateOrderViolation {
            invoice_date: invoice.invoice_date,
            due_date: invoice.due_date,
        });
    }

    for (field, value) in [
        ("subtotal", invoice.subtotal),
        ("tax_amount", invoice.tax_amount),
        ("commission_amount", invoice.commission_amount),
    ] {
        if value < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount { field, value });
        }
    }

    if invoice.commission_rate < Decimal::ZERO || invoice.commission_rate > Decimal::ONE {
        return Err(ValidationError::CommissionRateOutOfRange(
            invoice.commission_rate,
        ));
    }

    let expected_commission = (invoice.subtotal * invoice.commission_rate).round_dp(2);
    if (invoice.commission_amount - expected_commission).abs() > money_tolerance() {
        return Err(ValidationError::CommissionMismatch {
            expected: expected_commission,
            actual: invoice.commission_amount,
        });
    }

    if invoice.total_amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveTotal(invoice.total_amount));
    }

    if invoice.line_items.is_empty() {
        return Err(ValidationError::NoLineItems);
    }

    let mut line_total = Decimal::ZERO;
    for (index, line) in invoice.line_items.iter().enumerate() {
        validate_line_item(line, index)?;
        line_total += line.amount;
    }

    if (line_total - invoice.subtotal).abs() > money_tolerance() {
        return Err(ValidationError::SubtotalMismatch {
            line_total,
            subtotal: invoice.subtotal,
        });
    }

    Ok(())
}

fn validate_line_item(line: &LineItem, index: usize) -> Result<(), ValidationError> {
    if line.description.trim().is_empty() {
        return Err(ValidationError::EmptyLineDescription { index });
    }

    for (field, value) in [
        ("quantity", line.quantity),
        ("unit_price", line.unit_price),
        ("amount", line.amount),
    ] {
        if value < Decimal::ZERO {
            return Err(ValidationError::NegativeLineAmount {
                index,
                field,
                value,
            });
        }
    }

    let expected = (line.quantity * line.unit_price).round_dp(2);
    if (line.amount - expected).abs() > line_tolerance() {
        return Err(ValidationError::LineAmountMismatch {
            index,
            expected,
            actual: line.amount,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn valid_invoice() -> Invoice {
        Invoice {
            invoice_id: "DD-2026-000777".to_string(),
            vendor_name: "DoorDash".to_string(),
            vendor_type: VendorType::Doordash,
            invoice_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            currency: "USD".to_string(),
            subtotal: dec("250.00"),
            tax_amount: dec("20.00"),
            commission_rate: dec("0.2000"),
            commission_amount: dec("50.00"),
            total_amount: dec("220.00"),
            line_items: vec![
                LineItem {
                    description: "Delivery orders".to_string(),
                    quantity: dec("10"),
                    unit_price: dec("20.00"),
                    amount: dec("200.00"),
                },
                LineItem {
                    description: "Promotions".to_string(),
                    quantity: dec("2"),
                    unit_price: dec("25.00"),
                    amount: dec("50.00"),
                },
            ],
        }
    }

    #[test]
    fn valid_invoice_passes() {
        assert_eq!(validate_invoice(&valid_invoice(), None), Ok(()));
        assert_eq!(
            validate_invoice(&valid_invoice(), Some(VendorType::Doordash)),
            Ok(())
        );
    }

    #[test]
    fn invoice_id_pattern_is_enforced() {
        let mut invoice = valid_invoice();
        invoice.invoice_id = "dd-123".to_string();
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::InvalidInvoiceId(_))
        ));

        invoice.invoice_id = String::new();
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::InvalidInvoiceId(_))
        ));
    }

    #[test]
    fn date_order_is_enforced() {
        let mut invoice = valid_invoice();
        invoice.due_date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::DateOrderViolation { .. })
        ));
    }

    #[test]
    fn commission_cross_check_within_tolerance() {
        let mut invoice = valid_invoice();
        // Off by exactly 0.02, still acceptable.
        invoice.commission_amount = dec("50.02");
        assert_eq!(validate_invoice(&invoice, None), Ok(()));

        invoice.commission_amount = dec("50.03");
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::CommissionMismatch { .. })
        ));
    }

    #[test]
    fn subtotal_must_match_line_sum() {
        let mut invoice = valid_invoice();
        invoice.subtotal = dec("251.00");
        // Commission re-derives from subtotal, keep it consistent so the
        // subtotal rule is the one that fires.
        invoice.commission_amount = dec("50.20");
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::SubtotalMismatch { .. })
        ));
    }

    #[test]
    fn line_amount_must_match_quantity_times_price() {
        let mut invoice = valid_invoice();
        invoice.line_items[0].amount = dec("200.05");
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::LineAmountMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn vendor_mismatch_is_a_failure() {
        let invoice = valid_invoice();
        assert!(matches!(
            validate_invoice(&invoice, Some(VendorType::Ubereats)),
            Err(ValidationError::VendorMismatch { .. })
        ));
    }

    #[test]
    fn commission_rate_bounds() {
        let mut invoice = valid_invoice();
        invoice.commission_rate = dec("1.1");
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::CommissionRateOutOfRange(_))
        ));
    }

    #[test]
    fn total_must_be_positive() {
        let mut invoice = valid_invoice();
        invoice.total_amount = Decimal::ZERO;
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::NonPositiveTotal(_))
        ));
    }

    #[test]
    fn at_least_one_line_item() {
        let mut invoice = valid_invoice();
        invoice.line_items.clear();
        assert!(matches!(
            validate_invoice(&invoice, None),
            Err(ValidationError::NoLineItems)
        ));
    }
}
