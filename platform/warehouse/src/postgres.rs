//! Postgres implementation of the Warehouse trait

use crate::{str_field, RecordKey, Table, Warehouse, WarehouseError, WarehouseResult};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

/// Run the warehouse migrations against a pool.
///
/// Called by the writer and DLQ-handler binaries at boot.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Warehouse implementation over Postgres.
///
/// All statements for one `insert_rows` call run in a single
/// transaction so a crash mid-call leaves no dedupe marker behind and
/// the bus redelivery re-applies cleanly.
#[derive(Clone)]
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn claim_dedupe_token(
        tx: &mut Transaction<'_, Postgres>,
        table: Table,
        dedupe_id: &str,
    ) -> WarehouseResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (message_id, target_table)
            VALUES ($1, $2)
            ON CONFLICT (message_id, target_table) DO NOTHING
            "#,
        )
        .bind(dedupe_id)
        .bind(table.name())
        .execute(&mut **tx)
        .await
        .map_err(transient)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_invoice(
        tx: &mut Transaction<'_, Postgres>,
        row: &serde_json::Value,
    ) -> WarehouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices
                (invoice_id, vendor_type, vendor_name, invoice_date, due_date,
                 currency, subtotal, tax_amount, commission_rate,
                 commission_amount, total_amount, source_uri, content_hash)
            VALUES ($1, $2, $3, $4::date, $5::date,
                    $6, $7::numeric, $8::numeric, $9::numeric,
                    $10::numeric, $11::numeric, $12, $13)
            ON CONFLICT (invoice_id, vendor_type) DO NOTHING
            "#,
        )
        .bind(str_field(row, "invoices", "invoice_id")?)
        .bind(str_field(row, "invoices", "vendor_type")?)
        .bind(str_field(row, "invoices", "vendor_name")?)
        .bind(str_field(row, "invoices", "invoice_date")?)
        .bind(str_field(row, "invoices", "due_date")?)
        .bind(str_field(row, "invoices", "currency")?)
        .bind(str_field(row, "invoices", "subtotal")?)
        .bind(str_field(row, "invoices", "tax_amount")?)
        .bind(str_field(row, "invoices", "commission_rate")?)
        .bind(str_field(row, "invoices", "commission_amount")?)
        .bind(str_field(row, "invoices", "total_amount")?)
        .bind(str_field(row, "invoices", "source_uri")?)
        .bind(str_field(row, "invoices", "content_hash")?)
        .execute(&mut **tx)
        .await
        .map_err(transient)?;

        Ok(())
    }

    async fn insert_line_item(
        tx: &mut Transaction<'_, Postgres>,
        row: &serde_json::Value,
    ) -> WarehouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO line_items
                (invoice_id, vendor_type, position, description,
                 quantity, unit_price, amount)
            VALUES ($1, $2, $3, $4, $5::numeric, $6::numeric, $7::numeric)
            ON CONFLICT (invoice_id, vendor_type, position) DO NOTHING
            "#,
        )
        .bind(str_field(row, "line_items", "invoice_id")?)
        .bind(str_field(row, "line_items", "vendor_type")?)
        .bind(int_field(row, "line_items", "position")? as i32)
        .bind(str_field(row, "line_items", "description")?)
        .bind(str_field(row, "line_items", "quantity")?)
        .bind(str_field(row, "line_items", "unit_price")?)
        .bind(str_field(row, "line_items", "amount")?)
        .execute(&mut **tx)
        .await
        .map_err(transient)?;

        Ok(())
    }

    async fn insert_metrics(
        tx: &mut Transaction<'_, Postgres>,
        row: &serde_json::Value,
    ) -> WarehouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO extraction_metrics
                (invoice_id, vendor_type, provider, llm_latency_ms,
                 total_latency_ms, attempt_count, confidence,
                 input_tokens, output_tokens, cost_estimate, trace_id, success)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::numeric, $11, $12)
            "#,
        )
        .bind(row.get("invoice_id").and_then(|v| v.as_str()))
        .bind(str_field(row, "extraction_metrics", "vendor_type")?)
        .bind(str_field(row, "extraction_metrics", "provider")?)
        .bind(int_field(row, "extraction_metrics", "llm_latency_ms")?)
        .bind(int_field(row, "extraction_metrics", "total_latency_ms")?)
        .bind(int_field(row, "extraction_metrics", "attempt_count")? as i32)
        .bind(row.get("confidence").and_then(|v| v.as_f64()))
        .bind(row.get("input_tokens").and_then(|v| v.as_i64()))
        .bind(row.get("output_tokens").and_then(|v| v.as_i64()))
        .bind(row.get("cost_estimate").and_then(|v| v.as_str()))
        .bind(row.get("trace_id").and_then(|v| v.as_str()))
        .bind(
            row.get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        )
        .execute(&mut **tx)
        .await
        .map_err(transient)?;

        Ok(())
    }

    async fn upsert_dlq_audit(
        tx: &mut Transaction<'_, Postgres>,
        row: &serde_json::Value,
    ) -> WarehouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dlq_audit
                (stage, source_uri, reason, error_kind, last_error, attempts)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (stage, source_uri) DO UPDATE
            SET reason      = EXCLUDED.reason,
                error_kind  = EXCLUDED.error_kind,
                last_error  = EXCLUDED.last_error,
                attempts    = EXCLUDED.attempts,
                occurrences = dlq_audit.occurrences + 1,
                last_seen   = NOW()
            "#,
        )
        .bind(str_field(row, "dlq_audit", "stage")?)
        .bind(str_field(row, "dlq_audit", "source_uri")?)
        .bind(str_field(row, "dlq_audit", "reason")?)
        .bind(str_field(row, "dlq_audit", "error_kind")?)
        .bind(str_field(row, "dlq_audit", "last_error")?)
        .bind(int_field(row, "dlq_audit", "attempts")? as i32)
        .execute(&mut **tx)
        .await
        .map_err(transient)?;

        Ok(())
    }
}

fn transient(e: sqlx::Error) -> WarehouseError {
    WarehouseError::Transient(e.to_string())
}

fn int_field(
    row: &serde_json::Value,
    table: &'static str,
    field: &'static str,
) -> WarehouseResult<i64> {
    row.get(field)
        .and_then(|v| v.as_i64())
        .ok_or(WarehouseError::MalformedRow {
            table,
            detail: format!("missing integer field '{}'", field),
        })
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn insert_rows(
        &self,
        table: Table,
        rows: &[serde_json::Value],
        dedupe_id: Option<&str>,
    ) -> WarehouseResult<()> {
        let mut tx = self.pool.begin().await.map_err(transient)?;

        if let Some(id) = dedupe_id {
            if !Self::claim_dedupe_token(&mut tx, table, id).await? {
                tracing::debug!(
                    message_id = %id,
                    table = %table,
                    "Message already applied, skipping insert"
                );
                tx.rollback().await.map_err(transient)?;
                return Ok(());
            }
        }

        for row in rows {
            match table {
                Table::Invoices => Self::insert_invoice(&mut tx, row).await?,
                Table::LineItems => Self::insert_line_item(&mut tx, row).await?,
                Table::ExtractionMetrics => Self::insert_metrics(&mut tx, row).await?,
                Table::DlqAudit => Self::upsert_dlq_audit(&mut tx, row).await?,
            }
        }

        tx.commit().await.map_err(transient)?;

        tracing::debug!(table = %table, count = rows.len(), "Rows inserted");
        Ok(())
    }

    async fn exists_by_key(&self, table: Table, key: &RecordKey) -> WarehouseResult<bool> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE invoice_id = $1 AND vendor_type = $2",
            table.name()
        );
        let result: (i64,) = sqlx::query_as(&query)
            .bind(&key.invoice_id)
            .bind(&key.vendor_type)
            .fetch_one(&self.pool)
            .await
            .map_err(transient)?;

        Ok(result.0 > 0)
    }
}
