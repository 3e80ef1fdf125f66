//! Retry coordinator: owns the delivery state machine after the first
//! failure, the in-process timers, and the operator manual-retry surface.

use std::sync::{Arc, Weak};

use thiserror::Error;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};

use telarx_core::{DeliveryId, DomainError, OrderId, TenantId};
use telarx_pharmacy::delivery::{DeliveryRecord, DeliveryStatus};

use crate::gateway::SubmissionOutcome;
use crate::scheduler::RetryScheduler;
use crate::stores::{DeliveryStore, StoreError};
use crate::submit::{SubmissionError, Submitter};

/// Result of one retry attempt.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// The order reached the partner.
    Completed { partner_order_id: String },
    /// Transient failure; the next attempt is scheduled.
    Rescheduled { next_retry_at: DateTime<Utc> },
    /// Retry budget spent; the delivery is `failed`.
    Exhausted,
    /// Non-retryable failure; the delivery is `failed`.
    TerminalFailure,
    /// The record was missing or no longer `retry_pending`.
    Skipped,
}

#[derive(Debug, Error)]
pub enum ManualRetryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Drives deliveries from `retry_pending` to a terminal state.
pub struct RetryCoordinator {
    deliveries: Arc<dyn DeliveryStore>,
    submitter: Arc<Submitter>,
    scheduler: RetryScheduler,
    timers_enabled: bool,
    me: Weak<RetryCoordinator>,
}

impl RetryCoordinator {
    /// Coordinator with best-effort in-process timers enabled.
    pub fn new(deliveries: Arc<dyn DeliveryStore>, submitter: Arc<Submitter>) -> Arc<Self> {
        Self::build(deliveries, submitter, true)
    }

    /// Coordinator relying on the recovery sweep alone.
    ///
    /// Correctness is identical; retries just wait for the next sweep.
    pub fn without_timers(
        deliveries: Arc<dyn DeliveryStore>,
        submitter: Arc<Submitter>,
    ) -> Arc<Self> {
        Self::build(deliveries, submitter, false)
    }

    fn build(
        deliveries: Arc<dyn DeliveryStore>,
        submitter: Arc<Submitter>,
        timers_enabled: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            deliveries,
            submitter,
            scheduler: RetryScheduler::new(),
            timers_enabled,
            me: me.clone(),
        })
    }

    /// Create the initial delivery record for a failed first attempt.
    pub(crate) async fn record_initial_failure(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        err: &SubmissionError,
    ) -> Result<SubmissionOutcome, StoreError> {
        let error_text = err.to_string();

        if err.is_retryable() {
            let record = DeliveryRecord::retry_pending(tenant_id, order_id, &error_text);
            self.deliveries.create(&record).await?;
            warn!(
                order_id = %order_id,
                delivery_id = %record.id,
                error = %error_text,
                next_retry_at = ?record.next_retry_at,
                "submission failed, first retry scheduled"
            );
            self.arm_timer(&record);
            Ok(SubmissionOutcome::RetryScheduled {
                delivery_id: record.id,
                next_retry_at: record.next_retry_at.unwrap_or_else(Utc::now),
            })
        } else {
            let record = DeliveryRecord::failed(tenant_id, order_id, &error_text);
            self.deliveries.create(&record).await?;
            warn!(
                order_id = %order_id,
                delivery_id = %record.id,
                error = %error_text,
                "submission failed terminally"
            );
            Ok(SubmissionOutcome::Failed {
                delivery_id: record.id,
                error: error_text,
            })
        }
    }

    /// Run one retry attempt for a delivery.
    ///
    /// Starts with the optimistic guard: anything other than `retry_pending`
    /// means another path already handled this record, so skip. The attempt
    /// re-resolves coverage and rebuilds the request from current state.
    pub async fn retry_delivery(
        &self,
        tenant_id: TenantId,
        delivery_id: DeliveryId,
    ) -> Result<RetryOutcome, StoreError> {
        let Some(mut record) = self.deliveries.get(tenant_id, delivery_id).await? else {
            warn!(%delivery_id, "retry requested for unknown delivery");
            return Ok(RetryOutcome::Skipped);
        };

        if record.status != DeliveryStatus::RetryPending {
            debug!(%delivery_id, status = %record.status, "delivery not retry_pending, skipping");
            return Ok(RetryOutcome::Skipped);
        }

        record.begin_attempt();
        self.deliveries.update(&record).await?;

        match self.submitter.attempt(tenant_id, record.order_id).await {
            Ok(submission) => {
                record.complete_submission(
                    submission.partner_order_id.clone(),
                    submission.idempotency_key,
                );
                self.deliveries.update(&record).await?;
                self.scheduler.cancel(&delivery_id);
                info!(
                    %delivery_id,
                    order_id = %record.order_id,
                    partner_order_id = %submission.partner_order_id,
                    retry_count = record.retry_count,
                    "delivery recovered"
                );
                Ok(RetryOutcome::Completed {
                    partner_order_id: submission.partner_order_id,
                })
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let error_text = err.to_string();
                record.record_retry_failure(&error_text, retryable);
                self.deliveries.update(&record).await?;

                if record.status == DeliveryStatus::RetryPending {
                    let next_retry_at = record.next_retry_at.unwrap_or_else(Utc::now);
                    debug!(
                        %delivery_id,
                        retry_count = record.retry_count,
                        next_retry_at = %next_retry_at,
                        error = %error_text,
                        "retry failed, rescheduled"
                    );
                    self.arm_timer(&record);
                    Ok(RetryOutcome::Rescheduled { next_retry_at })
                } else {
                    self.scheduler.cancel(&delivery_id);
                    if retryable {
                        warn!(
                            %delivery_id,
                            attempts = record.retry_count + 1,
                            error = %error_text,
                            "retry budget exhausted, delivery failed"
                        );
                        Ok(RetryOutcome::Exhausted)
                    } else {
                        warn!(
                            %delivery_id,
                            error = %error_text,
                            "retry failed terminally"
                        );
                        Ok(RetryOutcome::TerminalFailure)
                    }
                }
            }
        }
    }

    /// Operator surface: reset a stuck or failed delivery and re-enter the
    /// state machine from the top of the schedule.
    pub async fn manual_retry(
        &self,
        tenant_id: TenantId,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryRecord, ManualRetryError> {
        let mut record = self
            .deliveries
            .get(tenant_id, delivery_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(delivery_id.to_string()))?;

        record.reset_for_manual_retry()?;
        self.deliveries.update(&record).await?;
        info!(
            %delivery_id,
            order_id = %record.order_id,
            "manual retry accepted, schedule reset"
        );
        self.arm_timer(&record);
        Ok(record)
    }

    /// Arm the best-effort in-process timer for a `retry_pending` record.
    fn arm_timer(&self, record: &DeliveryRecord) {
        if !self.timers_enabled {
            return;
        }
        let Some(at) = record.next_retry_at else {
            return;
        };
        let Some(coordinator) = self.me.upgrade() else {
            return;
        };

        let tenant_id = record.tenant_id;
        let delivery_id = record.id;
        self.scheduler.schedule(delivery_id, at, async move {
            if let Err(err) = coordinator.retry_delivery(tenant_id, delivery_id).await {
                warn!(%delivery_id, error = %err, "scheduled retry attempt errored");
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }
}
