//! # Warehouse Abstraction
//!
//! Capability interface over the analytical store the writer stage
//! feeds: `invoices`, `line_items`, `extraction_metrics`, plus the
//! `dlq_audit` table the DLQ handler maintains.
//!
//! ## Idempotency
//!
//! The bus delivers at-least-once, so `insert_rows` takes an optional
//! dedupe token (the inbound bus message id). A token that was already
//! applied for the same table turns the call into a no-op. The
//! `invoices` primary key `(invoice_id, vendor_type)` is the second
//! line of defence: conflicting inserts are silently skipped and the
//! writer's duplicate guard logs them.
//!
//! ## Implementations
//!
//! - **PostgresWarehouse**: production implementation over sqlx
//! - **InMemoryWarehouse**: test/dev implementation

mod inmemory;
mod postgres;

pub use inmemory::InMemoryWarehouse;
pub use postgres::{run_migrations, PostgresWarehouse};

use async_trait::async_trait;
use std::fmt;

/// Warehouse tables the pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Invoices,
    LineItems,
    ExtractionMetrics,
    DlqAudit,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Invoices => "invoices",
            Table::LineItems => "line_items",
            Table::ExtractionMetrics => "extraction_metrics",
            Table::DlqAudit => "dlq_audit",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary key of the `invoices` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub invoice_id: String,
    pub vendor_type: String,
}

impl RecordKey {
    pub fn new(invoice_id: impl Into<String>, vendor_type: impl Into<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            vendor_type: vendor_type.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("transient warehouse failure: {0}")]
    Transient(String),

    #[error("malformed row for table {table}: {detail}")]
    MalformedRow { table: &'static str, detail: String },
}

impl WarehouseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WarehouseError::Transient(_))
    }
}

pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Narrow warehouse capability used by the writer and the DLQ handler.
///
/// Rows are JSON objects matching the table columns; monetary values
/// travel as strings to preserve decimal precision end to end.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Insert rows into a table.
    ///
    /// When `dedupe_id` is given and was already applied to this table,
    /// the whole call is a no-op. `dlq_audit` rows upsert on
    /// `(stage, source_uri)`; `invoices` conflicts on the primary key
    /// are skipped.
    async fn insert_rows(
        &self,
        table: Table,
        rows: &[serde_json::Value],
        dedupe_id: Option<&str>,
    ) -> WarehouseResult<()>;

    /// Whether a row with the given key exists. Only meaningful for
    /// tables keyed by `(invoice_id, vendor_type)`.
    async fn exists_by_key(&self, table: Table, key: &RecordKey) -> WarehouseResult<bool>;
}

/// Extract a required string field from a JSON row.
pub(crate) fn str_field<'a>(
    row: &'a serde_json::Value,
    table: &'static str,
    field: &'static str,
) -> WarehouseResult<&'a str> {
    row.get(field)
        .and_then(|v| v.as_str())
        .ok_or(WarehouseError::MalformedRow {
            table,
            detail: format!("missing string field '{}'", field),
        })
}
