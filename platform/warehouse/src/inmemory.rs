//! In-memory implementation of the Warehouse trait for testing and development

use crate::{RecordKey, Table, Warehouse, WarehouseError, WarehouseResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    rows: HashMap<Table, Vec<serde_json::Value>>,
    applied_tokens: HashSet<(String, &'static str)>,
}

/// Warehouse implementation backed by process-local maps.
///
/// Mirrors the Postgres semantics the writer relies on: message-id
/// dedupe, primary-key conflict skips on `invoices`/`line_items`, and
/// `dlq_audit` upserts that bump the occurrence count.
#[derive(Clone, Default)]
pub struct InMemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's rows. Test helper.
    pub async fn rows_in(&self, table: Table) -> Vec<serde_json::Value> {
        let inner = self.inner.lock().await;
        inner.rows.get(&table).cloned().unwrap_or_default()
    }

    fn key_of(row: &serde_json::Value) -> Option<(String, String)> {
        Some((
            row.get("invoice_id")?.as_str()?.to_string(),
            row.get("vendor_type")?.as_str()?.to_string(),
        ))
    }

    fn dlq_key(row: &serde_json::Value) -> Option<(String, String)> {
        Some((
            row.get("stage")?.as_str()?.to_string(),
            row.get("source_uri")?.as_str()?.to_string(),
        ))
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn insert_rows(
        &self,
        table: Table,
        rows: &[serde_json::Value],
        dedupe_id: Option<&str>,
    ) -> WarehouseResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(id) = dedupe_id {
            if !inner
                .applied_tokens
                .insert((id.to_string(), table.name()))
            {
                tracing::debug!(
                    message_id = %id,
                    table = %table,
                    "Message already applied, skipping insert"
                );
                return Ok(());
            }
        }

        for row in rows {
            if !row.is_object() {
                return Err(WarehouseError::MalformedRow {
                    table: table.name(),
                    detail: "row is not a JSON object".to_string(),
                });
            }

            let existing = inner.rows.entry(table).or_default();
            match table {
                Table::Invoices | Table::LineItems => {
                    // Primary-key conflict: skip, like ON CONFLICT DO NOTHING.
                    let position = row.get("position").and_then(|v| v.as_i64());
                    let duplicate = existing.iter().any(|r| {
                        Self::key_of(r) == Self::key_of(row)
                            && r.get("position").and_then(|v| v.as_i64()) == position
                    });
                    if !duplicate {
                        existing.push(row.clone());
                    }
                }
                Table::ExtractionMetrics => existing.push(row.clone()),
                Table::DlqAudit => {
                    let key = Self::dlq_key(row);
                    if let Some(slot) = existing.iter_mut().find(|r| Self::dlq_key(r) == key) {
                        let occurrences =
                            slot.get("occurrences").and_then(|v| v.as_i64()).unwrap_or(1);
                        let mut updated = row.clone();
                        updated["occurrences"] = serde_json::json!(occurrences + 1);
                        if let Some(first_seen) = slot.get("first_seen") {
                            updated["first_seen"] = first_seen.clone();
                        }
                        *slot = updated;
                    } else {
                        let mut fresh = row.clone();
                        fresh["occurrences"] = serde_json::json!(1);
                        existing.push(fresh);
                    }
                }
            }
        }

        Ok(())
    }

    async fn exists_by_key(&self, table: Table, key: &RecordKey) -> WarehouseResult<bool> {
        let inner = self.inner.lock().await;
        let rows = inner.rows.get(&table);
        Ok(rows.is_some_and(|rows| {
            rows.iter().any(|r| {
                Self::key_of(r)
                    .is_some_and(|(id, vendor)| id == key.invoice_id && vendor == key.vendor_type)
            })
        }))
    }
}
