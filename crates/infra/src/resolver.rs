//! Coverage resolution service.

use std::sync::Arc;

use tracing::debug;

use telarx_pharmacy::coverage::{self, CoverageMapping};
use telarx_pharmacy::model::{OrderRecord, PatientRecord};

use crate::stores::{CoverageStore, StoreError};

/// Finds the partner mappings eligible to fulfill an order.
#[derive(Clone)]
pub struct CoverageResolver {
    coverage: Arc<dyn CoverageStore>,
}

impl CoverageResolver {
    pub fn new(coverage: Arc<dyn CoverageStore>) -> Self {
        Self { coverage }
    }

    /// Resolve eligible mappings for the order, in discovery order.
    ///
    /// An empty result means "not applicable" (no determinable state, or no
    /// active mapping for it) and is a normal outcome, not an error.
    pub async fn resolve(
        &self,
        order: &OrderRecord,
        patient: &PatientRecord,
    ) -> Result<Vec<CoverageMapping>, StoreError> {
        let Some(state) = coverage::routing_state(patient, order) else {
            debug!(order_id = %order.id, "no routing state on patient or order");
            return Ok(Vec::new());
        };

        let product_ids: Vec<_> = order.items.iter().map(|i| i.product_id).collect();
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self
            .coverage
            .find_active(order.tenant_id, &product_ids, &state)
            .await?;

        Ok(coverage::eligible_mappings(&order.items, &candidates, &state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryCoverageStore;
    use crate::test_support::{fixture, seed_coverage};

    #[tokio::test]
    async fn resolves_mappings_for_the_patient_state() {
        let coverage = Arc::new(InMemoryCoverageStore::new());
        let fx = fixture();
        seed_coverage(&coverage, &fx, "TX").await;

        let resolver = CoverageResolver::new(coverage);
        let found = resolver.resolve(&fx.order, &fx.patient).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state, "TX");
    }

    #[tokio::test]
    async fn empty_when_state_has_no_mapping() {
        let coverage = Arc::new(InMemoryCoverageStore::new());
        let fx = fixture();
        seed_coverage(&coverage, &fx, "CA").await;

        let resolver = CoverageResolver::new(coverage);
        assert!(resolver.resolve(&fx.order, &fx.patient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_when_no_state_is_determinable() {
        let coverage = Arc::new(InMemoryCoverageStore::new());
        let mut fx = fixture();
        seed_coverage(&coverage, &fx, "TX").await;
        fx.patient.state = None;
        fx.order.shipping_address = None;

        let resolver = CoverageResolver::new(coverage);
        assert!(resolver.resolve(&fx.order, &fx.patient).await.unwrap().is_empty());
    }
}
