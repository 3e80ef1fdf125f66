//! Coverage eligibility: which partner mappings can serve an order.

use serde::{Deserialize, Serialize};

use telarx_core::{CoverageId, ProductId, TenantId};

use crate::model::{OrderItem, OrderRecord, PatientRecord};

/// A (product, partner medication, partner pharmacy, state) routing entry.
///
/// This is the one table the pipeline owns; an inactive mapping is kept for
/// history but never routes new orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMapping {
    pub id: CoverageId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    /// Partner-side medication identifier.
    pub medication_id: String,
    /// Partner-side pharmacy identifier that dispenses in `state`.
    pub pharmacy_id: String,
    /// Two-letter state this mapping serves.
    pub state: String,
    pub active: bool,
}

/// Resolve the state an order should be routed for.
///
/// The patient profile wins; the order's shipping address is the fallback.
/// `None` means routing is simply not applicable, not an error.
pub fn routing_state(patient: &PatientRecord, order: &OrderRecord) -> Option<String> {
    let raw = patient
        .state
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            order
                .shipping_address
                .as_ref()
                .map(|a| a.state.trim())
                .filter(|s| !s.is_empty())
        })?;

    Some(raw.to_ascii_uppercase())
}

/// Filter mappings down to the active ones serving `state`, in discovery
/// order: order line items first, then the order the store returned
/// mappings in. Callers take the first entry; with several eligible
/// mappings that choice is deterministic but otherwise arbitrary.
pub fn eligible_mappings(
    items: &[OrderItem],
    mappings: &[CoverageMapping],
    state: &str,
) -> Vec<CoverageMapping> {
    let mut eligible: Vec<CoverageMapping> = Vec::new();

    for item in items {
        for mapping in mappings {
            if mapping.active
                && mapping.product_id == item.product_id
                && mapping.state.eq_ignore_ascii_case(state)
                && !eligible.iter().any(|m| m.id == mapping.id)
            {
                eligible.push(mapping.clone());
            }
        }
    }

    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use telarx_core::{OrderId, PatientId};

    fn mapping(product_id: ProductId, state: &str, active: bool) -> CoverageMapping {
        CoverageMapping {
            id: CoverageId::new(),
            tenant_id: TenantId::new(),
            product_id,
            medication_id: format!("med-{state}"),
            pharmacy_id: "ph-01".to_string(),
            state: state.to_string(),
            active,
        }
    }

    fn item(product_id: ProductId) -> OrderItem {
        OrderItem {
            product_id,
            quantity: 30,
            days_supply: Some(30),
            refills: 0,
            directions: None,
        }
    }

    fn patient(state: Option<&str>) -> PatientRecord {
        PatientRecord {
            id: PatientId::new(),
            tenant_id: TenantId::new(),
            email: "pat@example.com".to_string(),
            first_name: "Pat".to_string(),
            last_name: "Doe".to_string(),
            phone: None,
            date_of_birth: None,
            gender: None,
            state: state.map(str::to_string),
            address: None,
        }
    }

    fn order(shipping_state: Option<&str>) -> OrderRecord {
        OrderRecord {
            id: OrderId::new(),
            tenant_id: TenantId::new(),
            number: "RX-1".to_string(),
            patient_id: PatientId::new(),
            items: Vec::new(),
            shipping_address: shipping_state.map(|s| crate::model::Address {
                street: "1 Main St".to_string(),
                street_2: None,
                city: "Austin".to_string(),
                state: s.to_string(),
                zip: "78701".to_string(),
                country: "US".to_string(),
            }),
        }
    }

    #[test]
    fn profile_state_wins_over_shipping_state() {
        let state = routing_state(&patient(Some("tx")), &order(Some("CA")));
        assert_eq!(state.as_deref(), Some("TX"));
    }

    #[test]
    fn shipping_state_is_the_fallback() {
        let state = routing_state(&patient(None), &order(Some("ca")));
        assert_eq!(state.as_deref(), Some("CA"));
    }

    #[test]
    fn no_state_means_not_applicable() {
        assert_eq!(routing_state(&patient(None), &order(None)), None);
        assert_eq!(routing_state(&patient(Some("  ")), &order(None)), None);
    }

    #[test]
    fn only_active_mappings_for_the_state_are_eligible() {
        let product = ProductId::new();
        let mappings = vec![
            mapping(product, "CA", true),
            mapping(product, "TX", true),
            mapping(product, "TX", false),
        ];

        let eligible = eligible_mappings(&[item(product)], &mappings, "TX");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].state, "TX");
        assert!(eligible[0].active);
    }

    #[test]
    fn discovery_order_follows_line_items() {
        let first = ProductId::new();
        let second = ProductId::new();
        let mappings = vec![mapping(second, "TX", true), mapping(first, "TX", true)];

        let eligible = eligible_mappings(&[item(first), item(second)], &mappings, "TX");
        assert_eq!(eligible.len(), 2);
        assert_eq!(eligible[0].product_id, first);
        assert_eq!(eligible[1].product_id, second);
    }

    #[test]
    fn state_match_ignores_case() {
        let product = ProductId::new();
        let mappings = vec![mapping(product, "tx", true)];
        assert_eq!(eligible_mappings(&[item(product)], &mappings, "TX").len(), 1);
    }
}
