//! The invoice entity extracted from scanned vendor statements.

use crate::dates::DateOrder;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery platform that issued the invoice.
///
/// The five supported platforms plus an `other` bucket for statements
/// the classifier cannot attribute. Serialized lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorType {
    Ubereats,
    Doordash,
    Grubhub,
    Ifood,
    Rappi,
    Other,
}

impl VendorType {
    /// All classifiable vendors, in filename-prefix priority order.
    pub const NAMED: [VendorType; 5] = [
        VendorType::Ubereats,
        VendorType::Doordash,
        VendorType::Grubhub,
        VendorType::Ifood,
        VendorType::Rappi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorType::Ubereats => "ubereats",
            VendorType::Doordash => "doordash",
            VendorType::Grubhub => "grubhub",
            VendorType::Ifood => "ifood",
            VendorType::Rappi => "rappi",
            VendorType::Other => "other",
        }
    }

    /// Parse a vendor string as it appears on the wire or in filenames.
    pub fn parse(s: &str) -> Option<VendorType> {
        match s.to_ascii_lowercase().as_str() {
            "ubereats" => Some(VendorType::Ubereats),
            "doordash" => Some(VendorType::Doordash),
            "grubhub" => Some(VendorType::Grubhub),
            "ifood" => Some(VendorType::Ifood),
            "rappi" => Some(VendorType::Rappi),
            "other" => Some(VendorType::Other),
            _ => None,
        }
    }

    /// ISO 4217 currency assumed when the statement does not state one.
    pub fn default_currency(&self) -> &'static str {
        match self {
            VendorType::Ifood => "BRL",
            VendorType::Rappi => "COP",
            _ => "USD",
        }
    }

    /// Component order for numeric dates on this vendor's statements.
    ///
    /// iFood (pt-BR) and Rappi (es-CO) print day-first dates; the US
    /// platforms print month-first.
    pub fn date_order(&self) -> DateOrder {
        match self {
            VendorType::Ifood | VendorType::Rappi => DateOrder::DayFirst,
            _ => DateOrder::MonthFirst,
        }
    }
}

impl fmt::Display for VendorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billed line on an invoice.
///
/// `amount` must equal `quantity * unit_price` within a cent; the
/// extractor computes it when the statement omits the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

/// One vendor payment statement.
///
/// All monetary fields are exact decimals and travel as JSON strings to
/// preserve precision. `(invoice_id, vendor_type)` is the warehouse
/// primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub vendor_name: String,
    pub vendor_type: VendorType,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub tax_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    pub line_items: Vec<LineItem>,
}

impl Invoice {
    /// Stable SHA-256 over the canonical JSON form.
    ///
    /// Used as the extraction idempotency marker: re-publication of the
    /// same extraction carries the same hash.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }
}
