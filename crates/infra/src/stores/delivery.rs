//! Delivery record storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use telarx_core::{DeliveryId, OrderId, TenantId};
use telarx_pharmacy::delivery::{DeliveryRecord, DeliveryStatus};

use super::StoreError;

/// Delivery record store abstraction.
///
/// Writes are whole-record updates keyed by `id`; last writer wins. No
/// multi-record transactions are required by the pipeline.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist a new record.
    async fn create(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// Fetch one record, enforcing tenant isolation.
    async fn get(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Replace a record wholesale.
    async fn update(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// All lineages for an order, oldest first.
    async fn find_by_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Records in a given status for operator tooling, oldest first.
    async fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: DeliveryStatus,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// `retry_pending` records whose `last_retry_at` is older than
    /// `older_than` (or never set), oldest first, across all tenants.
    ///
    /// This is the recovery sweep's feed; never-attempted records sort first.
    async fn list_due_for_recovery(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Per-tenant status counts for the analytics dashboard.
    async fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats, StoreError>;
}

/// Per-status delivery counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DeliveryStats {
    pub pending: usize,
    pub processing: usize,
    pub retry_pending: usize,
    pub failed: usize,
    pub completed: usize,
}

/// In-memory delivery store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    records: RwLock<HashMap<DeliveryId, DeliveryRecord>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn create(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let records = self.records.read().unwrap();
        match records.get(&id) {
            Some(record) if record.tenant_id == tenant_id => Ok(Some(record.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn update(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if !records.contains_key(&record.id) {
            return Err(StoreError::NotFound(record.id.to_string()));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_by_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.order_id == order_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: DeliveryStatus,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn list_due_for_recovery(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut due: Vec<_> = records
            .values()
            .filter(|r| {
                r.status == DeliveryStatus::RetryPending
                    && r.last_retry_at.map_or(true, |at| at < older_than)
            })
            .cloned()
            .collect();
        // None sorts before Some: never-attempted records are the oldest.
        due.sort_by_key(|r| (r.last_retry_at, r.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats, StoreError> {
        let records = self.records.read().unwrap();
        let mut stats = DeliveryStats::default();
        for record in records.values().filter(|r| r.tenant_id == tenant_id) {
            match record.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Processing => stats.processing += 1,
                DeliveryStatus::RetryPending => stats.retry_pending += 1,
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::Completed => stats.completed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tenant_id: TenantId) -> DeliveryRecord {
        DeliveryRecord::retry_pending(tenant_id, OrderId::new(), "partner API error (503)")
    }

    #[tokio::test]
    async fn create_get_update_round_trip() {
        let store = InMemoryDeliveryStore::new();
        let tenant = TenantId::new();
        let mut rec = record(tenant);

        store.create(&rec).await.unwrap();
        assert!(matches!(
            store.create(&rec).await,
            Err(StoreError::AlreadyExists(_))
        ));

        rec.complete_submission("po-1", "RX-1");
        store.update(&rec).await.unwrap();

        let loaded = store.get(tenant, rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DeliveryStatus::Processing);
    }

    #[tokio::test]
    async fn tenant_isolation_is_enforced() {
        let store = InMemoryDeliveryStore::new();
        let rec = record(TenantId::new());
        store.create(&rec).await.unwrap();

        assert!(matches!(
            store.get(TenantId::new(), rec.id).await,
            Err(StoreError::TenantIsolation)
        ));
    }

    #[tokio::test]
    async fn recovery_feed_orders_oldest_first_with_nulls_leading() {
        let store = InMemoryDeliveryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        let mut never_tried = record(tenant);
        never_tried.last_retry_at = None;

        let mut old = record(tenant);
        old.last_retry_at = Some(now - chrono::Duration::minutes(30));

        let mut older = record(tenant);
        older.last_retry_at = Some(now - chrono::Duration::minutes(60));

        let mut recent = record(tenant);
        recent.last_retry_at = Some(now - chrono::Duration::seconds(10));

        for r in [&never_tried, &old, &older, &recent] {
            store.create(r).await.unwrap();
        }

        let cutoff = now - chrono::Duration::minutes(2);
        let due = store.list_due_for_recovery(cutoff, 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![never_tried.id, older.id, old.id]);

        let capped = store.list_due_for_recovery(cutoff, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].id, never_tried.id);
        assert_eq!(capped[1].id, older.id);
    }

    #[tokio::test]
    async fn terminal_records_never_enter_the_recovery_feed() {
        let store = InMemoryDeliveryStore::new();
        let tenant = TenantId::new();

        let failed = DeliveryRecord::failed(tenant, OrderId::new(), "Invalid ZIP code");
        let processing = DeliveryRecord::processing(tenant, OrderId::new(), "po-1", "RX-1");
        store.create(&failed).await.unwrap();
        store.create(&processing).await.unwrap();

        let due = store
            .list_due_for_recovery(Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let store = InMemoryDeliveryStore::new();
        let tenant = TenantId::new();

        store.create(&record(tenant)).await.unwrap();
        store.create(&record(tenant)).await.unwrap();
        store
            .create(&DeliveryRecord::failed(tenant, OrderId::new(), "boom"))
            .await
            .unwrap();
        // Another tenant's records stay out of the count.
        store.create(&record(TenantId::new())).await.unwrap();

        let stats = store.stats(tenant).await.unwrap();
        assert_eq!(stats.retry_pending, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processing, 0);
    }
}
