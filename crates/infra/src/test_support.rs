//! Shared fixtures for pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use telarx_core::{CoverageId, OrderId, PatientId, ProductId, TenantId};
use telarx_partner::client::PartnerApi;
use telarx_partner::error::PartnerError;
use telarx_partner::types::{PartnerOrder, PartnerPatient};
use telarx_pharmacy::coverage::CoverageMapping;
use telarx_pharmacy::model::{Address, OrderItem, OrderRecord, PatientRecord};
use telarx_pharmacy::request::{OrderPayload, PatientPayload};

use crate::gateway::SubmissionGateway;
use crate::resolver::CoverageResolver;
use crate::retry::RetryCoordinator;
use crate::stores::{
    CoverageStore, InMemoryCoverageStore, InMemoryDeliveryStore, InMemoryOrderReader,
    InMemoryPatientReader,
};
use crate::submit::Submitter;

pub(crate) struct Fixture {
    pub tenant_id: TenantId,
    pub order: OrderRecord,
    pub patient: PatientRecord,
}

pub(crate) fn test_address() -> Address {
    Address {
        street: "500 W 2nd St".to_string(),
        street_2: None,
        city: "Austin".to_string(),
        state: "TX".to_string(),
        zip: "78701".to_string(),
        country: "US".to_string(),
    }
}

/// A Texas patient with one prescription line, ready to route.
pub(crate) fn fixture() -> Fixture {
    let tenant_id = TenantId::new();
    let patient = PatientRecord {
        id: PatientId::new(),
        tenant_id,
        email: "pat@example.com".to_string(),
        first_name: "Pat".to_string(),
        last_name: "Doe".to_string(),
        phone: Some("512-555-0142".to_string()),
        date_of_birth: Some("1990-04-02".to_string()),
        gender: Some("F".to_string()),
        state: Some("TX".to_string()),
        address: Some(test_address()),
    };
    let order = OrderRecord {
        id: OrderId::new(),
        tenant_id,
        number: "RX-10293".to_string(),
        patient_id: patient.id,
        items: vec![OrderItem {
            product_id: ProductId::new(),
            quantity: 4,
            days_supply: Some(28),
            refills: 0,
            directions: Some("Inject 0.25mg weekly".to_string()),
        }],
        shipping_address: Some(test_address()),
    };

    Fixture {
        tenant_id,
        order,
        patient,
    }
}

/// Seed an active mapping for the fixture's first line item.
pub(crate) async fn seed_coverage(
    store: &Arc<InMemoryCoverageStore>,
    fx: &Fixture,
    state: &str,
) -> CoverageMapping {
    let mapping = CoverageMapping {
        id: CoverageId::new(),
        tenant_id: fx.tenant_id,
        product_id: fx.order.items[0].product_id,
        medication_id: "med-semaglutide".to_string(),
        pharmacy_id: "ph-07".to_string(),
        state: state.to_string(),
        active: true,
    };
    store.upsert(mapping.clone()).await.unwrap();
    mapping
}

/// Scriptable partner double.
///
/// Defaults to the happy path (no existing patient, creates succeed, order
/// submissions succeed); failures are queued with [`ScriptedPartner::fail_next`].
#[derive(Default)]
pub(crate) struct ScriptedPartner {
    existing_patient: Mutex<Option<PartnerPatient>>,
    submit_failures: Mutex<VecDeque<PartnerError>>,
    last_order_payload: Mutex<Option<OrderPayload>>,
    pub submit_calls: AtomicUsize,
    pub created_patients: AtomicUsize,
}

impl ScriptedPartner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_existing_patient(&self, uuid: &str) {
        *self.existing_patient.lock().unwrap() = Some(PartnerPatient {
            uuid: uuid.to_string(),
            email: None,
        });
    }

    /// Queue `count` API failures for upcoming order submissions.
    pub fn fail_next(&self, count: usize, status: u16, body: &str) {
        let mut failures = self.submit_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(PartnerError::api(status, body));
        }
    }

    pub fn last_order_payload(&self) -> Option<OrderPayload> {
        self.last_order_payload.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartnerApi for ScriptedPartner {
    async fn find_patient_by_email(
        &self,
        _email: &str,
    ) -> Result<Option<PartnerPatient>, PartnerError> {
        Ok(self.existing_patient.lock().unwrap().clone())
    }

    async fn create_patient(
        &self,
        payload: &PatientPayload,
    ) -> Result<PartnerPatient, PartnerError> {
        self.created_patients.fetch_add(1, Ordering::SeqCst);
        Ok(PartnerPatient {
            uuid: "pp-created".to_string(),
            email: Some(payload.email.clone()),
        })
    }

    async fn submit_order(&self, payload: &OrderPayload) -> Result<PartnerOrder, PartnerError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_order_payload.lock().unwrap() = Some(payload.clone());

        if let Some(failure) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }

        Ok(PartnerOrder {
            uuid: format!("po-{call}"),
            order_id: payload.order_id.clone(),
            status: Some("received".to_string()),
        })
    }
}

/// Fully wired pipeline over in-memory stores and the scripted partner.
pub(crate) struct TestPipeline {
    pub tenant_id: TenantId,
    pub orders: Arc<InMemoryOrderReader>,
    pub patients: Arc<InMemoryPatientReader>,
    pub coverage: Arc<InMemoryCoverageStore>,
    pub deliveries: Arc<InMemoryDeliveryStore>,
    pub partner: Arc<ScriptedPartner>,
    pub coordinator: Arc<RetryCoordinator>,
    pub gateway: SubmissionGateway,
    /// The active TX mapping seeded for the fixture order.
    pub mapping: CoverageMapping,
}

pub(crate) async fn pipeline(fx: &Fixture) -> TestPipeline {
    build_pipeline(fx, false).await
}

pub(crate) async fn pipeline_with_timers(fx: &Fixture) -> TestPipeline {
    build_pipeline(fx, true).await
}

async fn build_pipeline(fx: &Fixture, timers: bool) -> TestPipeline {
    let orders = Arc::new(InMemoryOrderReader::new());
    let patients = Arc::new(InMemoryPatientReader::new());
    let coverage = Arc::new(InMemoryCoverageStore::new());
    let deliveries = Arc::new(InMemoryDeliveryStore::new());
    let partner = ScriptedPartner::new();

    orders.insert(fx.order.clone());
    patients.insert(fx.patient.clone());
    let mapping = seed_coverage(&coverage, fx, "TX").await;

    let submitter = Arc::new(Submitter::new(
        orders.clone(),
        patients.clone(),
        CoverageResolver::new(coverage.clone()),
        partner.clone(),
    ));
    let coordinator = if timers {
        RetryCoordinator::new(deliveries.clone(), submitter.clone())
    } else {
        RetryCoordinator::without_timers(deliveries.clone(), submitter.clone())
    };
    let gateway = SubmissionGateway::new(submitter, deliveries.clone(), coordinator.clone());

    TestPipeline {
        tenant_id: fx.tenant_id,
        orders,
        patients,
        coverage,
        deliveries,
        partner,
        coordinator,
        gateway,
        mapping,
    }
}
