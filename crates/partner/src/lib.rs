//! `telarx-partner` — HTTP client for the pharmacy fulfillment partner.
//!
//! Exposes [`PartnerApi`], the small surface the pipeline needs (patient
//! lookup/create, order submission), with a reqwest implementation that
//! handles bearer-token acquisition and caching.

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpPartnerClient, PartnerApi, PartnerConfig};
pub use error::PartnerError;
pub use types::{PartnerOrder, PartnerPatient};
