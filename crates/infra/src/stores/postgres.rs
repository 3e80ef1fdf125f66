//! Postgres-backed stores.
//!
//! Tenant isolation is enforced the same way as the in-memory stores:
//! lookups fetch by key and reject rows belonging to another tenant rather
//! than silently filtering them out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use telarx_core::{DeliveryId, OrderId, PatientId, ProductId, TenantId};
use telarx_pharmacy::coverage::CoverageMapping;
use telarx_pharmacy::delivery::{DeliveryRecord, DeliveryStatus};
use telarx_pharmacy::model::{Address, OrderItem, OrderRecord, PatientRecord};

use super::delivery::{DeliveryStats, DeliveryStore};
use super::coverage::CoverageStore;
use super::read_models::{OrderReader, PatientReader};
use super::StoreError;

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::AlreadyExists(db.message().to_string())
        }
        _ => StoreError::Storage(format!("{operation}: {err}")),
    }
}

/// Postgres delivery record store.
#[derive(Debug, Clone)]
pub struct PostgresDeliveryStore {
    pool: PgPool,
}

impl PostgresDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table and indexes when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pharmacy_deliveries (
                id               UUID PRIMARY KEY,
                tenant_id        UUID NOT NULL,
                order_id         UUID NOT NULL,
                status           TEXT NOT NULL,
                partner_order_id TEXT NULL,
                idempotency_key  TEXT NULL,
                retry_count      INTEGER NOT NULL DEFAULT 0,
                last_retry_at    TIMESTAMPTZ NULL,
                next_retry_at    TIMESTAMPTZ NULL,
                retry_error      TEXT NULL,
                created_at       TIMESTAMPTZ NOT NULL,
                updated_at       TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create pharmacy_deliveries", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pharmacy_deliveries_order \
             ON pharmacy_deliveries (tenant_id, order_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("index pharmacy_deliveries order", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pharmacy_deliveries_recovery \
             ON pharmacy_deliveries (status, last_retry_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("index pharmacy_deliveries recovery", e))?;

        Ok(())
    }
}

fn row_to_delivery(row: &PgRow) -> Result<DeliveryRecord, StoreError> {
    let status_str: String = row
        .try_get("status")
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    let status = DeliveryStatus::parse(&status_str)
        .map_err(|e| StoreError::Storage(e.to_string()))?;

    let get_uuid = |name: &str| -> Result<Uuid, StoreError> {
        row.try_get(name)
            .map_err(|e| StoreError::Storage(format!("{name}: {e}")))
    };

    let retry_count: i32 = row
        .try_get("retry_count")
        .map_err(|e| StoreError::Storage(e.to_string()))?;

    Ok(DeliveryRecord {
        id: DeliveryId::from_uuid(get_uuid("id")?),
        tenant_id: TenantId::from_uuid(get_uuid("tenant_id")?),
        order_id: OrderId::from_uuid(get_uuid("order_id")?),
        status,
        partner_order_id: row
            .try_get("partner_order_id")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        idempotency_key: row
            .try_get("idempotency_key")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        retry_count: retry_count.max(0) as u32,
        last_retry_at: row
            .try_get("last_retry_at")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        next_retry_at: row
            .try_get("next_retry_at")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        retry_error: row
            .try_get("retry_error")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
    })
}

const DELIVERY_COLUMNS: &str = "id, tenant_id, order_id, status, partner_order_id, \
     idempotency_key, retry_count, last_retry_at, next_retry_at, retry_error, \
     created_at, updated_at";

#[async_trait]
impl DeliveryStore for PostgresDeliveryStore {
    async fn create(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pharmacy_deliveries (
                id, tenant_id, order_id, status, partner_order_id,
                idempotency_key, retry_count, last_retry_at, next_retry_at,
                retry_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.tenant_id.as_uuid())
        .bind(record.order_id.as_uuid())
        .bind(record.status.as_str())
        .bind(&record.partner_order_id)
        .bind(&record.idempotency_key)
        .bind(record.retry_count as i32)
        .bind(record.last_retry_at)
        .bind(record.next_retry_at)
        .bind(&record.retry_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert delivery", e))?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM pharmacy_deliveries WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get delivery", e))?;

        match row {
            Some(row) => {
                let record = row_to_delivery(&row)?;
                if record.tenant_id != tenant_id {
                    return Err(StoreError::TenantIsolation);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pharmacy_deliveries
            SET status = $2,
                partner_order_id = $3,
                idempotency_key = $4,
                retry_count = $5,
                last_retry_at = $6,
                next_retry_at = $7,
                retry_error = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.status.as_str())
        .bind(&record.partner_order_id)
        .bind(&record.idempotency_key)
        .bind(record.retry_count as i32)
        .bind(record.last_retry_at)
        .bind(record.next_retry_at)
        .bind(&record.retry_error)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update delivery", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    async fn find_by_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM pharmacy_deliveries \
             WHERE tenant_id = $1 AND order_id = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find deliveries by order", e))?;

        rows.iter().map(row_to_delivery).collect()
    }

    async fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: DeliveryStatus,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM pharmacy_deliveries \
             WHERE tenant_id = $1 AND status = $2 \
             ORDER BY created_at ASC LIMIT $3"
        ))
        .bind(tenant_id.as_uuid())
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list deliveries by status", e))?;

        rows.iter().map(row_to_delivery).collect()
    }

    async fn list_due_for_recovery(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM pharmacy_deliveries \
             WHERE status = 'retry_pending' \
               AND (last_retry_at IS NULL OR last_retry_at < $1) \
             ORDER BY last_retry_at ASC NULLS FIRST, created_at ASC \
             LIMIT $2"
        ))
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list deliveries due for recovery", e))?;

        rows.iter().map(row_to_delivery).collect()
    }

    async fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM pharmacy_deliveries \
             WHERE tenant_id = $1 GROUP BY status",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delivery stats", e))?;

        let mut stats = DeliveryStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let count = count.max(0) as usize;
            match DeliveryStatus::parse(&status) {
                Ok(DeliveryStatus::Pending) => stats.pending = count,
                Ok(DeliveryStatus::Processing) => stats.processing = count,
                Ok(DeliveryStatus::RetryPending) => stats.retry_pending = count,
                Ok(DeliveryStatus::Failed) => stats.failed = count,
                Ok(DeliveryStatus::Completed) => stats.completed = count,
                Err(_) => {
                    return Err(StoreError::Storage(format!("unknown status row: {status}")));
                }
            }
        }
        Ok(stats)
    }
}

/// Postgres coverage mapping store.
#[derive(Debug, Clone)]
pub struct PostgresCoverageStore {
    pool: PgPool,
}

impl PostgresCoverageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pharmacy_coverage (
                id            UUID PRIMARY KEY,
                tenant_id     UUID NOT NULL,
                product_id    UUID NOT NULL,
                medication_id TEXT NOT NULL,
                pharmacy_id   TEXT NOT NULL,
                state         TEXT NOT NULL,
                active        BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create pharmacy_coverage", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pharmacy_coverage_state \
             ON pharmacy_coverage (tenant_id, state)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("index pharmacy_coverage state", e))?;

        Ok(())
    }
}

fn row_to_mapping(row: &PgRow) -> Result<CoverageMapping, StoreError> {
    let get = |name: &str| -> Result<Uuid, StoreError> {
        row.try_get(name)
            .map_err(|e| StoreError::Storage(format!("{name}: {e}")))
    };

    Ok(CoverageMapping {
        id: get("id")?.into(),
        tenant_id: TenantId::from_uuid(get("tenant_id")?),
        product_id: ProductId::from_uuid(get("product_id")?),
        medication_id: row
            .try_get("medication_id")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        pharmacy_id: row
            .try_get("pharmacy_id")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        state: row
            .try_get("state")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        active: row
            .try_get("active")
            .map_err(|e| StoreError::Storage(e.to_string()))?,
    })
}

#[async_trait]
impl CoverageStore for PostgresCoverageStore {
    async fn find_active(
        &self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
        state: &str,
    ) -> Result<Vec<CoverageMapping>, StoreError> {
        let ids: Vec<Uuid> = product_ids.iter().map(|p| *p.as_uuid()).collect();

        let rows = sqlx::query(
            "SELECT id, tenant_id, product_id, medication_id, pharmacy_id, state, active \
             FROM pharmacy_coverage \
             WHERE tenant_id = $1 \
               AND active \
               AND UPPER(state) = UPPER($2) \
               AND product_id = ANY($3) \
             ORDER BY id ASC",
        )
        .bind(tenant_id.as_uuid())
        .bind(state)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find active coverage", e))?;

        rows.iter().map(row_to_mapping).collect()
    }

    async fn upsert(&self, mapping: CoverageMapping) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pharmacy_coverage (
                id, tenant_id, product_id, medication_id, pharmacy_id, state, active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET medication_id = EXCLUDED.medication_id,
                pharmacy_id = EXCLUDED.pharmacy_id,
                state = EXCLUDED.state,
                active = EXCLUDED.active
            "#,
        )
        .bind(mapping.id.as_uuid())
        .bind(mapping.tenant_id.as_uuid())
        .bind(mapping.product_id.as_uuid())
        .bind(&mapping.medication_id)
        .bind(&mapping.pharmacy_id)
        .bind(&mapping.state)
        .bind(mapping.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert coverage", e))?;
        Ok(())
    }
}

fn try_str(row: &PgRow, name: &str) -> Result<String, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::Storage(format!("{name}: {e}")))
}

fn try_opt_str(row: &PgRow, name: &str) -> Result<Option<String>, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::Storage(format!("{name}: {e}")))
}

/// Read-only view over the order service's tables.
///
/// The `orders`/`order_items` tables are owned by another service; the
/// pipeline never writes them.
#[derive(Debug, Clone)]
pub struct PostgresOrderReader {
    pool: PgPool,
}

impl PostgresOrderReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderReader for PostgresOrderReader {
    async fn get(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT id, tenant_id, number, patient_id, \
                    ship_street, ship_street_2, ship_city, ship_state, ship_zip, ship_country \
             FROM orders WHERE id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get order", e))?
        else {
            return Ok(None);
        };

        let row_tenant: Uuid = row
            .try_get("tenant_id")
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        if TenantId::from_uuid(row_tenant) != tenant_id {
            return Err(StoreError::TenantIsolation);
        }

        let shipping_address = match try_opt_str(&row, "ship_street")? {
            Some(street) => Some(Address {
                street,
                street_2: try_opt_str(&row, "ship_street_2")?,
                city: try_opt_str(&row, "ship_city")?.unwrap_or_default(),
                state: try_opt_str(&row, "ship_state")?.unwrap_or_default(),
                zip: try_opt_str(&row, "ship_zip")?.unwrap_or_default(),
                country: try_opt_str(&row, "ship_country")?.unwrap_or_default(),
            }),
            None => None,
        };

        let patient_id: Uuid = row
            .try_get("patient_id")
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let item_rows = sqlx::query(
            "SELECT product_id, quantity, days_supply, refills, directions \
             FROM order_items WHERE order_id = $1 ORDER BY line_no ASC",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get order items", e))?;

        let mut items = Vec::with_capacity(item_rows.len());
        for item in &item_rows {
            let product_id: Uuid = item
                .try_get("product_id")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let quantity: i64 = item
                .try_get("quantity")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let days_supply: Option<i64> = item
                .try_get("days_supply")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let refills: i32 = item
                .try_get("refills")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            items.push(OrderItem {
                product_id: ProductId::from_uuid(product_id),
                quantity,
                days_supply,
                refills: refills.max(0) as u32,
                directions: try_opt_str(item, "directions")?,
            });
        }

        Ok(Some(OrderRecord {
            id: order_id,
            tenant_id,
            number: try_str(&row, "number")?,
            patient_id: PatientId::from_uuid(patient_id),
            items,
            shipping_address,
        }))
    }
}

/// Read-only view over the profile service's `patients` table.
#[derive(Debug, Clone)]
pub struct PostgresPatientReader {
    pool: PgPool,
}

impl PostgresPatientReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientReader for PostgresPatientReader {
    async fn get(
        &self,
        tenant_id: TenantId,
        patient_id: PatientId,
    ) -> Result<Option<PatientRecord>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT id, tenant_id, email, first_name, last_name, phone, date_of_birth, \
                    gender, state, street, street_2, city, addr_state, zip, country \
             FROM patients WHERE id = $1",
        )
        .bind(patient_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get patient", e))?
        else {
            return Ok(None);
        };

        let row_tenant: Uuid = row
            .try_get("tenant_id")
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        if TenantId::from_uuid(row_tenant) != tenant_id {
            return Err(StoreError::TenantIsolation);
        }

        let address = match try_opt_str(&row, "street")? {
            Some(street) => Some(Address {
                street,
                street_2: try_opt_str(&row, "street_2")?,
                city: try_opt_str(&row, "city")?.unwrap_or_default(),
                state: try_opt_str(&row, "addr_state")?.unwrap_or_default(),
                zip: try_opt_str(&row, "zip")?.unwrap_or_default(),
                country: try_opt_str(&row, "country")?.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Some(PatientRecord {
            id: patient_id,
            tenant_id,
            email: try_str(&row, "email")?,
            first_name: try_str(&row, "first_name")?,
            last_name: try_str(&row, "last_name")?,
            phone: try_opt_str(&row, "phone")?,
            date_of_birth: try_opt_str(&row, "date_of_birth")?,
            gender: try_opt_str(&row, "gender")?,
            state: try_opt_str(&row, "state")?,
            address,
        }))
    }
}
