//! Confidence scoring for validated extractions.
//!
//! The score is informational and never gates publishing. Schema
//! validity is a hard requirement upstream, so every scored extraction
//! already passed validation; the score reflects how much of the
//! payload the model reported outright versus what had to be derived.

use crate::parse::ParsedExtraction;

/// Attached when no finer signal is available.
pub const DEFAULT_CONFIDENCE: f64 = 0.9;

/// Base earned by passing schema and business-rule validation.
const VALIDATION_WEIGHT: f64 = 0.6;
/// Share earned by reporting optional fields instead of relying on
/// derived values.
const OPTIONAL_FIELDS_WEIGHT: f64 = 0.25;
/// Share earned by reported-and-agreeing arithmetic cross-checks.
const CROSS_CHECK_WEIGHT: f64 = 0.15;

/// Signals collected while coercing the raw payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfidenceSignals {
    pub optional_present: u32,
    pub optional_total: u32,
    /// The model reported a subtotal (and it matched the line sum).
    pub subtotal_reported: bool,
    /// The model reported both commission fields (and they agreed).
    pub commission_reported: bool,
}

/// Score a validated extraction in `[0, 1]`.
pub fn confidence_score(parsed: &ParsedExtraction) -> f64 {
    let signals = &parsed.signals;

    if signals.optional_total == 0 {
        return DEFAULT_CONFIDENCE;
    }

    let optional = signals.optional_present as f64 / signals.optional_total as f64;

    let reported_checks = signals.subtotal_reported as u32 + signals.commission_reported as u32;
    let cross = reported_checks as f64 / 2.0;

    let score = VALIDATION_WEIGHT + OPTIONAL_FIELDS_WEIGHT * optional + CROSS_CHECK_WEIGHT * cross;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_llm_invoice;
    use invoice_contracts::VendorType;

    fn parsed(json: &str, vendor: VendorType) -> ParsedExtraction {
        parse_llm_invoice(json, vendor).unwrap()
    }

    #[test]
    fn fully_reported_payload_scores_high() {
        let json = r#"{
            "invoice_id": "UE-1", "vendor_name": "Uber Eats", "vendor_type": "ubereats",
            "invoice_date": "2026-01-21", "due_date": "2026-02-20", "currency": "USD",
            "subtotal": "100.00", "tax_amount": "8.00",
            "commission_rate": "0.30", "commission_amount": "30.00",
            "total_amount": "78.00",
            "line_items": [{"description": "x", "quantity": "10", "unit_price": "10.00", "amount": "100.00"}]
        }"#;
        let score = confidence_score(&parsed(json, VendorType::Ubereats));
        assert!(score >= 0.9, "score {} below 0.9", score);
        assert!(score <= 1.0);
    }

    #[test]
    fn derived_fields_lower_the_score() {
        let full = r#"{
            "invoice_id": "A-1", "vendor_name": "A", "vendor_type": "other",
            "invoice_date": "2026-01-01", "due_date": "2026-02-01", "currency": "USD",
            "subtotal": "10.00", "tax_amount": "0.00",
            "commission_rate": "0.10", "commission_amount": "1.00",
            "total_amount": "9.00",
            "line_items": [{"description": "x", "quantity": "1", "unit_price": "10.00", "amount": "10.00"}]
        }"#;
        let sparse = r#"{
            "invoice_id": "A-1", "vendor_name": "A",
            "invoice_date": "2026-01-01", "due_date": "2026-02-01",
            "total_amount": "10.00",
            "line_items": [{"description": "x", "quantity": "1", "unit_price": "10.00"}]
        }"#;

        let full_score = confidence_score(&parsed(full, VendorType::Other));
        let sparse_score = confidence_score(&parsed(sparse, VendorType::Other));
        assert!(full_score > sparse_score);
        assert!(sparse_score >= VALIDATION_WEIGHT - 1e-9);
    }

    #[test]
    fn no_signals_yields_the_default() {
        let mut extraction = parsed(
            r#"{
                "invoice_id": "A-1", "vendor_name": "A",
                "invoice_date": "2026-01-01", "due_date": "2026-02-01",
                "total_amount": "10.00",
                "line_items": [{"description": "x", "unit_price": "10.00"}]
            }"#,
            VendorType::Other,
        );
        extraction.signals = ConfidenceSignals::default();
        assert_eq!(confidence_score(&extraction), DEFAULT_CONFIDENCE);
    }
}
