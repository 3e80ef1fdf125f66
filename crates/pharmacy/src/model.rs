//! Read models consumed by the pipeline.
//!
//! Orders and patients are owned by other services; the pipeline reads them
//! fresh on every attempt so data corrections land in later retries.

use serde::{Deserialize, Serialize};

use telarx_core::{OrderId, PatientId, ProductId, TenantId};

/// Mailing address as stored on patient profiles and orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub street_2: Option<String>,
    pub city: String,
    /// Raw state value; validated to a 2-letter code by the request builder.
    pub state: String,
    /// Raw ZIP value; validated to 5-9 digits by the request builder.
    pub zip: String,
    pub country: String,
}

/// Patient profile read model.
///
/// Demographic fields are kept raw here; normalization into the partner's
/// field constraints happens in [`crate::request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: PatientId,
    pub tenant_id: TenantId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    /// Raw date of birth as captured at intake (ideally `YYYY-MM-DD`).
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    /// Two-letter state from the profile, when the patient provided one.
    pub state: Option<String>,
    pub address: Option<Address>,
}

/// One prescription line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub days_supply: Option<i64>,
    pub refills: u32,
    pub directions: Option<String>,
}

/// Paid order read model, as handed to the pipeline by the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub tenant_id: TenantId,
    /// Human-facing order number (e.g. `RX-10293`); embedded in the
    /// idempotency key sent to the partner.
    pub number: String,
    pub patient_id: PatientId,
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<Address>,
}
