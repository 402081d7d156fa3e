//! LLM output handling: fence stripping, JSON parsing, and coercion of
//! the model's loose payload into the canonical [`Invoice`].
//!
//! The model is asked for bare JSON with string decimals, but real
//! outputs arrive fenced, with numeric literals, percentage rates, or
//! locale-formatted amounts. Everything normalizes here; validation
//! proper happens afterwards against the canonical entity.

use crate::confidence::ConfidenceSignals;
use invoice_contracts::{
    parse_amount, parse_date, AmountParseError, DateParseError, Invoice, LineItem, VendorType,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("model output is not valid JSON: {0}")]
    Json(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}': {source}")]
    Amount {
        field: &'static str,
        source: AmountParseError,
    },

    #[error("field '{field}': {source}")]
    Date {
        field: &'static str,
        source: DateParseError,
    },

    #[error("unknown vendor_type '{0}'")]
    UnknownVendor(String),

    #[error("line_items must be a non-empty array")]
    NoLineItems,
}

/// The model's payload before coercion. Every field is optional here;
/// required-ness is enforced during coercion so one missing field
/// produces a precise error instead of a serde soup.
#[derive(Debug, Default, Deserialize)]
pub struct RawInvoice {
    invoice_id: Option<String>,
    vendor_name: Option<String>,
    vendor_type: Option<String>,
    invoice_date: Option<String>,
    due_date: Option<String>,
    currency: Option<String>,
    subtotal: Option<serde_json::Value>,
    tax_amount: Option<serde_json::Value>,
    commission_rate: Option<serde_json::Value>,
    commission_amount: Option<serde_json::Value>,
    total_amount: Option<serde_json::Value>,
    #[serde(default)]
    line_items: Vec<RawLineItem>,
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    description: Option<String>,
    quantity: Option<serde_json::Value>,
    unit_price: Option<serde_json::Value>,
    amount: Option<serde_json::Value>,
}

/// A coerced extraction plus the signals the confidence score needs.
#[derive(Debug)]
pub struct ParsedExtraction {
    pub invoice: Invoice,
    pub signals: ConfidenceSignals,
}

/// Strip markdown code fences the model may wrap around the JSON.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop a language tag like ```json
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse and coerce one model response.
///
/// `vendor` is the classifier's verdict; it supplies the date locale
/// and currency default, and fills `vendor_type` when the model omits
/// it (a stated mismatch still fails validation downstream).
pub fn parse_llm_invoice(text: &str, vendor: VendorType) -> Result<ParsedExtraction, ParseFailure> {
    let body = strip_code_fences(text);

    let raw: RawInvoice = match serde_json::from_str(body) {
        Ok(raw) => raw,
        Err(first_err) => {
            // Models sometimes lead with prose; retry on the outermost
            // JSON object before giving up.
            match (body.find('{'), body.rfind('}')) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&body[start..=end])
                        .map_err(|e| ParseFailure::Json(e.to_string()))?
                }
                _ => return Err(ParseFailure::Json(first_err.to_string())),
            }
        }
    };

    coerce(raw, vendor)
}

fn coerce(raw: RawInvoice, vendor: VendorType) -> Result<ParsedExtraction, ParseFailure> {
    let invoice_id = required_text(raw.invoice_id, "invoice_id")?
        .trim()
        .to_uppercase();
    let vendor_name = required_text(raw.vendor_name, "vendor_name")?;

    let vendor_type = match raw.vendor_type.as_deref() {
        None | Some("") => vendor,
        Some(s) => VendorType::parse(s).ok_or_else(|| ParseFailure::UnknownVendor(s.to_string()))?,
    };

    let order = vendor.date_order();
    let invoice_date = date_field(raw.invoice_date, "invoice_date", order)?;
    let due_date = date_field(raw.due_date, "due_date", order)?;

    let currency_reported = raw.currency.as_deref().is_some_and(|c| !c.trim().is_empty());
    let currency = raw
        .currency
        .filter(|c| !c.trim().is_empty())
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(|| vendor.default_currency().to_string());

    if raw.line_items.is_empty() {
        return Err(ParseFailure::NoLineItems);
    }

    let mut all_line_amounts_reported = true;
    let mut line_items = Vec::with_capacity(raw.line_items.len());
    for raw_line in raw.line_items {
        let description = required_text(raw_line.description, "line_items[].description")?;

        let quantity = amount_field(raw_line.quantity, "line_items[].quantity")?
            .unwrap_or(Decimal::ONE);
        let reported_amount = amount_field(raw_line.amount, "line_items[].amount")?;
        if reported_amount.is_none() {
            all_line_amounts_reported = false;
        }

        let unit_price = match amount_field(raw_line.unit_price, "line_items[].unit_price")? {
            Some(price) => price,
            None => match reported_amount {
                Some(amount) if !quantity.is_zero() => (amount / quantity).round_dp(2),
                _ => return Err(ParseFailure::MissingField("line_items[].unit_price")),
            },
        };

        let amount = reported_amount.unwrap_or_else(|| (quantity * unit_price).round_dp(2));

        line_items.push(LineItem {
            description,
            quantity,
            unit_price,
            amount: amount.round_dp(2),
        });
    }

    let line_total: Decimal = line_items.iter().map(|l| l.amount).sum();

    let subtotal_reported = raw.subtotal.is_some();
    let subtotal = amount_field(raw.subtotal, "subtotal")?
        .unwrap_or(line_total)
        .round_dp(2);

    let tax_reported = raw.tax_amount.is_some();
    let tax_amount = amount_field(raw.tax_amount, "tax_amount")?
        .unwrap_or(Decimal::ZERO)
        .round_dp(2);

    let rate_reported = raw.commission_rate.is_some();
    let commission_reported = rate_reported && raw.commission_amount.is_some();
    let raw_rate = amount_field(raw.commission_rate, "commission_rate")?;
    let raw_commission = amount_field(raw.commission_amount, "commission_amount")?;

    // Statements often print the rate as a percentage; a rate in
    // (1, 100] is read as one.
    let commission_rate = match raw_rate {
        Some(rate) if rate > Decimal::ONE && rate <= Decimal::from(100) => {
            (rate / Decimal::from(100)).round_dp(4)
        }
        Some(rate) => rate.round_dp(4),
        None => match raw_commission {
            Some(amount) if !subtotal.is_zero() => (amount / subtotal).round_dp(4),
            _ => Decimal::ZERO,
        },
    };

    let commission_amount = raw_commission
        .unwrap_or_else(|| (subtotal * commission_rate).round_dp(2))
        .round_dp(2);

    let total_amount = amount_field(raw.total_amount, "total_amount")?
        .ok_or(ParseFailure::MissingField("total_amount"))?
        .round_dp(2);

    let optional_present = [
        currency_reported,
        tax_reported,
        rate_reported,
        subtotal_reported,
        all_line_amounts_reported,
    ]
    .iter()
    .filter(|present| **present)
    .count() as u32;

    let invoice = Invoice {
        invoice_id,
        vendor_name,
        vendor_type,
        invoice_date,
        due_date,
        currency,
        subtotal,
        tax_amount,
        commission_rate,
        commission_amount,
        total_amount,
        line_items,
    };

    let signals = ConfidenceSignals {
        optional_present,
        optional_total: 5,
        subtotal_reported,
        commission_reported,
    };

    Ok(ParsedExtraction { invoice, signals })
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ParseFailure> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ParseFailure::MissingField(field))
}

fn date_field(
    value: Option<String>,
    field: &'static str,
    order: invoice_contracts::DateOrder,
) -> Result<chrono::NaiveDate, ParseFailure> {
    let raw = value.ok_or(ParseFailure::MissingField(field))?;
    parse_date(&raw, order).map_err(|source| ParseFailure::Date { field, source })
}

/// Accept both `"1.234,56"` and bare JSON numbers for money fields.
fn amount_field(
    value: Option<serde_json::Value>,
    field: &'static str,
) -> Result<Option<Decimal>, ParseFailure> {
    let Some(value) = value else {
        return Ok(None);
    };

    let parsed = match &value {
        serde_json::Value::String(s) => {
            parse_amount(s).map_err(|source| ParseFailure::Amount { field, source })?
        }
        serde_json::Value::Number(n) => {
            Decimal::from_str(&n.to_string()).map_err(|_| ParseFailure::Amount {
                field,
                source: AmountParseError::Malformed(n.to_string()),
            })?
        }
        other => {
            return Err(ParseFailure::Amount {
                field,
                source: AmountParseError::Malformed(other.to_string()),
            })
        }
    };

    Ok(Some(parsed))
}
