//! `telarx-pharmacy` — pure domain logic for the pharmacy submission pipeline.
//!
//! Everything in this crate is deterministic and runtime-free: the delivery
//! record state machine, coverage eligibility, partner request construction,
//! failure classification, and the retry backoff schedule. IO lives in
//! `telarx-infra` and `telarx-partner`.

pub mod backoff;
pub mod classify;
pub mod coverage;
pub mod delivery;
pub mod model;
pub mod request;

pub use backoff::{RETRY_CAP, RETRY_SCHEDULE, cap_reached, delay_for};
pub use classify::is_retryable_message;
pub use coverage::CoverageMapping;
pub use delivery::{DeliveryRecord, DeliveryStatus};
pub use model::{Address, OrderItem, OrderRecord, PatientRecord};
pub use request::ConstructionError;
