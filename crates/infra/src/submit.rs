//! One submission attempt against the partner.
//!
//! [`Submitter::attempt`] is shared by the gateway (first attempt) and the
//! retry coordinator (every later attempt). It always works from freshly
//! loaded order/patient state, so corrections made between attempts are
//! picked up.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use telarx_core::{OrderId, TenantId};
use telarx_partner::client::PartnerApi;
use telarx_partner::error::PartnerError;
use telarx_partner::types::PartnerPatient;
use telarx_pharmacy::classify::is_retryable_message;
use telarx_pharmacy::model::{Address, PatientRecord};
use telarx_pharmacy::request::{self, ConstructionError};

use crate::resolver::CoverageResolver;
use crate::stores::{OrderReader, PatientReader, StoreError};

/// Why a submission attempt failed.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// No eligible coverage mapping; the order is not routable to the
    /// partner. Not an error condition worth a delivery record.
    #[error("no eligible routing for order")]
    NoRouting,

    #[error("order not found")]
    OrderNotFound,

    #[error("patient not found")]
    PatientNotFound,

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SubmissionError {
    /// Classify for the retry coordinator.
    ///
    /// Routing and construction failures are terminal by kind; everything
    /// else falls back to the pattern match over the rendered message.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::NoRouting
            | SubmissionError::OrderNotFound
            | SubmissionError::PatientNotFound
            | SubmissionError::Construction(_) => false,
            other => is_retryable_message(&other.to_string()),
        }
    }
}

/// A successful handoff to the partner.
#[derive(Debug, Clone)]
pub struct PartnerSubmission {
    pub partner_order_id: String,
    pub idempotency_key: String,
}

/// Performs the coverage → patient → order submission sequence.
pub struct Submitter {
    orders: Arc<dyn OrderReader>,
    patients: Arc<dyn PatientReader>,
    resolver: CoverageResolver,
    partner: Arc<dyn PartnerApi>,
}

impl Submitter {
    pub fn new(
        orders: Arc<dyn OrderReader>,
        patients: Arc<dyn PatientReader>,
        resolver: CoverageResolver,
        partner: Arc<dyn PartnerApi>,
    ) -> Self {
        Self {
            orders,
            patients,
            resolver,
            partner,
        }
    }

    /// Run one full submission attempt for an order.
    pub async fn attempt(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<PartnerSubmission, SubmissionError> {
        let order = self
            .orders
            .get(tenant_id, order_id)
            .await?
            .ok_or(SubmissionError::OrderNotFound)?;
        let patient = self
            .patients
            .get(tenant_id, order.patient_id)
            .await?
            .ok_or(SubmissionError::PatientNotFound)?;

        let mappings = self.resolver.resolve(&order, &patient).await?;
        let Some(mapping) = mappings.first() else {
            return Err(SubmissionError::NoRouting);
        };

        // First eligible mapping wins; discovery order is deterministic but
        // otherwise arbitrary when several mappings serve the state.
        let item = order
            .items
            .iter()
            .find(|i| i.product_id == mapping.product_id)
            .ok_or(SubmissionError::NoRouting)?;

        let partner_patient = self
            .ensure_partner_patient(&patient, order.shipping_address.as_ref())
            .await?;

        let key = request::idempotency_key(&order.number, mapping, mappings.len() > 1);
        let payload =
            request::build_order_payload(&order, item, mapping, &partner_patient.uuid, &key)?;
        let partner_order = self.partner.submit_order(&payload).await?;

        info!(
            order_id = %order_id,
            partner_order_id = %partner_order.uuid,
            idempotency_key = %key,
            "order submitted to partner"
        );

        Ok(PartnerSubmission {
            partner_order_id: partner_order.uuid,
            idempotency_key: key,
        })
    }

    /// Look the patient up by email and create them if absent.
    ///
    /// The partner's lookup-by-email is authoritative; the lookup-then-create
    /// race is an accepted low-probability risk.
    async fn ensure_partner_patient(
        &self,
        patient: &PatientRecord,
        fallback_address: Option<&Address>,
    ) -> Result<PartnerPatient, SubmissionError> {
        if let Some(existing) = self.partner.find_patient_by_email(&patient.email).await? {
            debug!(partner_patient_id = %existing.uuid, "partner patient already exists");
            return Ok(existing);
        }

        let payload = request::build_patient_payload(patient, fallback_address)?;
        Ok(self.partner.create_patient(&payload).await?)
    }
}
