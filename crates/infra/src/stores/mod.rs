//! Persistence abstractions for the pipeline.
//!
//! The delivery record and coverage mapping tables are owned here; orders
//! and patients are external read models consumed through reader traits.
//! In-memory implementations back tests and development, Postgres backs
//! production.

pub mod coverage;
pub mod delivery;
pub mod postgres;
pub mod read_models;

pub use coverage::{CoverageStore, InMemoryCoverageStore};
pub use delivery::{DeliveryStats, DeliveryStore, InMemoryDeliveryStore};
pub use postgres::{
    PostgresCoverageStore, PostgresDeliveryStore, PostgresOrderReader, PostgresPatientReader,
};
pub use read_models::{InMemoryOrderReader, InMemoryPatientReader, OrderReader, PatientReader};

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("tenant isolation violation")]
    TenantIsolation,

    #[error("storage error: {0}")]
    Storage(String),
}
