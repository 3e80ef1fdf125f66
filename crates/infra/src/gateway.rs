//! Submission gateway: the single entry point after payment capture.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use telarx_core::{DeliveryId, OrderId, TenantId};
use telarx_pharmacy::delivery::DeliveryRecord;

use crate::retry::RetryCoordinator;
use crate::stores::DeliveryStore;
use crate::submit::{SubmissionError, Submitter};

/// What happened to a submission request.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// The order is with the partner; a `processing` record was persisted.
    Submitted {
        delivery_id: DeliveryId,
        partner_order_id: String,
    },
    /// No eligible routing. No delivery record is created.
    NotApplicable,
    /// A non-terminal lineage already exists for the order.
    AlreadyInFlight { delivery_id: DeliveryId },
    /// A successful lineage already exists for the order.
    AlreadySubmitted { delivery_id: DeliveryId },
    /// The attempt failed with a transient error; a retry is scheduled.
    RetryScheduled {
        delivery_id: DeliveryId,
        next_retry_at: DateTime<Utc>,
    },
    /// The attempt failed terminally; the record is `failed` for audit.
    Failed {
        delivery_id: DeliveryId,
        error: String,
    },
}

/// Coordinates the first submission attempt for a paid order.
pub struct SubmissionGateway {
    submitter: Arc<Submitter>,
    deliveries: Arc<dyn DeliveryStore>,
    coordinator: Arc<RetryCoordinator>,
}

impl SubmissionGateway {
    pub fn new(
        submitter: Arc<Submitter>,
        deliveries: Arc<dyn DeliveryStore>,
        coordinator: Arc<RetryCoordinator>,
    ) -> Self {
        Self {
            submitter,
            deliveries,
            coordinator,
        }
    }

    /// Submit an order to the fulfillment partner.
    ///
    /// Never starts a new lineage while one is live or already successful;
    /// only a `failed` lineage permits a fresh submission (operators normally
    /// use manual retry instead).
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let existing = self.deliveries.find_by_order(tenant_id, order_id).await?;

        if let Some(live) = existing.iter().find(|r| r.status.is_live()) {
            warn!(
                order_id = %order_id,
                delivery_id = %live.id,
                status = %live.status,
                "submission refused: delivery already in flight"
            );
            return Ok(SubmissionOutcome::AlreadyInFlight {
                delivery_id: live.id,
            });
        }

        if let Some(done) = existing.iter().find(|r| r.status.is_success()) {
            warn!(
                order_id = %order_id,
                delivery_id = %done.id,
                "submission refused: order already submitted"
            );
            return Ok(SubmissionOutcome::AlreadySubmitted {
                delivery_id: done.id,
            });
        }

        match self.submitter.attempt(tenant_id, order_id).await {
            Ok(submission) => {
                let record = DeliveryRecord::processing(
                    tenant_id,
                    order_id,
                    submission.partner_order_id.clone(),
                    submission.idempotency_key,
                );
                self.deliveries.create(&record).await?;
                info!(
                    order_id = %order_id,
                    delivery_id = %record.id,
                    partner_order_id = %submission.partner_order_id,
                    "delivery record created as processing"
                );
                Ok(SubmissionOutcome::Submitted {
                    delivery_id: record.id,
                    partner_order_id: submission.partner_order_id,
                })
            }
            Err(SubmissionError::NoRouting) => {
                info!(order_id = %order_id, "no eligible routing; submission not applicable");
                Ok(SubmissionOutcome::NotApplicable)
            }
            // Missing read models and store failures are caller/infra
            // problems, not delivery failures; no record is created.
            Err(
                err @ (SubmissionError::OrderNotFound
                | SubmissionError::PatientNotFound
                | SubmissionError::Store(_)),
            ) => Err(err),
            Err(err) => Ok(self
                .coordinator
                .record_initial_failure(tenant_id, order_id, &err)
                .await?),
        }
    }
}
