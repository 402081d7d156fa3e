//! Vendor classification from source object names.
//!
//! The synthetic upload convention prefixes the vendor on the filename
//! (`ubereats_INV-UE-123_20260121.tiff`). Anything that does not match
//! a known prefix classifies as `other`; no OCR facility is wired.

use invoice_contracts::VendorType;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VENDOR_PREFIX_RE: Regex =
        Regex::new(r"(?i)^(ubereats|doordash|grubhub|ifood|rappi)[_\-]").unwrap();
}

/// Classify a source object by its filename prefix.
pub fn vendor_from_object_name(object_name: &str) -> VendorType {
    let file_name = object_name.rsplit('/').next().unwrap_or(object_name);

    VENDOR_PREFIX_RE
        .captures(file_name)
        .and_then(|captures| VendorType::parse(&captures[1]))
        .unwrap_or(VendorType::Other)
}
