//! Tracing/logging initialization for TelaRx processes.

pub mod tracing;

pub use tracing::init;
