//! Coverage mapping storage.

use std::sync::RwLock;

use async_trait::async_trait;

use telarx_core::{ProductId, TenantId};
use telarx_pharmacy::coverage::CoverageMapping;

use super::StoreError;

/// Coverage mapping store abstraction.
#[async_trait]
pub trait CoverageStore: Send + Sync {
    /// Active mappings for any of `product_ids` serving `state`, in a stable
    /// order (insertion order for the in-memory store, primary key order for
    /// Postgres). The resolver relies on that order being deterministic.
    async fn find_active(
        &self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
        state: &str,
    ) -> Result<Vec<CoverageMapping>, StoreError>;

    /// Insert or replace a mapping (admin/seed surface).
    async fn upsert(&self, mapping: CoverageMapping) -> Result<(), StoreError>;
}

/// In-memory coverage store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCoverageStore {
    mappings: RwLock<Vec<CoverageMapping>>,
}

impl InMemoryCoverageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoverageStore for InMemoryCoverageStore {
    async fn find_active(
        &self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
        state: &str,
    ) -> Result<Vec<CoverageMapping>, StoreError> {
        let mappings = self.mappings.read().unwrap();
        Ok(mappings
            .iter()
            .filter(|m| {
                m.tenant_id == tenant_id
                    && m.active
                    && m.state.eq_ignore_ascii_case(state)
                    && product_ids.contains(&m.product_id)
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, mapping: CoverageMapping) -> Result<(), StoreError> {
        let mut mappings = self.mappings.write().unwrap();
        if let Some(existing) = mappings.iter_mut().find(|m| m.id == mapping.id) {
            *existing = mapping;
        } else {
            mappings.push(mapping);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telarx_core::CoverageId;

    fn mapping(tenant_id: TenantId, product_id: ProductId, state: &str) -> CoverageMapping {
        CoverageMapping {
            id: CoverageId::new(),
            tenant_id,
            product_id,
            medication_id: "med-1".to_string(),
            pharmacy_id: "ph-1".to_string(),
            state: state.to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn finds_only_matching_tenant_product_and_state() {
        let store = InMemoryCoverageStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();

        store.upsert(mapping(tenant, product, "TX")).await.unwrap();
        store.upsert(mapping(tenant, product, "CA")).await.unwrap();
        store
            .upsert(mapping(TenantId::new(), product, "TX"))
            .await
            .unwrap();

        let found = store.find_active(tenant, &[product], "TX").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state, "TX");
    }

    #[tokio::test]
    async fn inactive_mappings_are_excluded() {
        let store = InMemoryCoverageStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();

        let mut retired = mapping(tenant, product, "TX");
        retired.active = false;
        store.upsert(retired).await.unwrap();

        assert!(store
            .find_active(tenant, &[product], "TX")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryCoverageStore::new();
        let tenant = TenantId::new();
        let product = ProductId::new();

        let mut m = mapping(tenant, product, "TX");
        store.upsert(m.clone()).await.unwrap();
        m.pharmacy_id = "ph-2".to_string();
        store.upsert(m).await.unwrap();

        let found = store.find_active(tenant, &[product], "TX").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pharmacy_id, "ph-2");
    }
}
