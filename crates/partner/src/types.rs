//! Partner API response shapes.
//!
//! Request bodies live in `telarx_pharmacy::request`; these are the `{ data:
//! ... }` envelopes the partner sends back.

use serde::Deserialize;

/// Single-object response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// `GET /patients?email=` response; an empty list means "not found".
#[derive(Debug, Clone, Deserialize)]
pub struct PatientQueryResponse {
    #[serde(default)]
    pub data: Vec<PartnerPatient>,
}

/// Partner-side patient.
#[derive(Debug, Clone, Deserialize)]
pub struct PartnerPatient {
    pub uuid: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Partner-side order, as returned from `POST /orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct PartnerOrder {
    /// The partner is inconsistent about `uuid` vs `id` here.
    #[serde(alias = "id")]
    pub uuid: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}
