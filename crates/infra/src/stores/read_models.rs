//! Readers for externally-owned records.
//!
//! Orders and patients belong to other services; the pipeline only ever
//! reads them, and re-reads on every retry so corrections are picked up.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use telarx_core::{OrderId, PatientId, TenantId};
use telarx_pharmacy::model::{OrderRecord, PatientRecord};

use super::StoreError;

#[async_trait]
pub trait OrderReader: Send + Sync {
    async fn get(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<OrderRecord>, StoreError>;
}

#[async_trait]
pub trait PatientReader: Send + Sync {
    async fn get(
        &self,
        tenant_id: TenantId,
        patient_id: PatientId,
    ) -> Result<Option<PatientRecord>, StoreError>;
}

/// In-memory order reader for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderReader {
    orders: RwLock<HashMap<OrderId, OrderRecord>>,
}

impl InMemoryOrderReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: OrderRecord) {
        self.orders.write().unwrap().insert(order.id, order);
    }
}

#[async_trait]
impl OrderReader for InMemoryOrderReader {
    async fn get(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let orders = self.orders.read().unwrap();
        match orders.get(&order_id) {
            Some(order) if order.tenant_id == tenant_id => Ok(Some(order.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }
}

/// In-memory patient reader for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPatientReader {
    patients: RwLock<HashMap<PatientId, PatientRecord>>,
}

impl InMemoryPatientReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, patient: PatientRecord) {
        self.patients.write().unwrap().insert(patient.id, patient);
    }
}

#[async_trait]
impl PatientReader for InMemoryPatientReader {
    async fn get(
        &self,
        tenant_id: TenantId,
        patient_id: PatientId,
    ) -> Result<Option<PatientRecord>, StoreError> {
        let patients = self.patients.read().unwrap();
        match patients.get(&patient_id) {
            Some(patient) if patient.tenant_id == tenant_id => Ok(Some(patient.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }
}
