//! Delivery record: the persisted submission lineage for one order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use telarx_core::{DeliveryId, DomainError, DomainResult, OrderId, TenantId};

use crate::backoff::{cap_reached, delay_for};

/// Upper bound on stored failure text.
pub const MAX_RETRY_ERROR_LEN: usize = 512;

/// Delivery lifecycle status.
///
/// `processing` and `completed` are success states; shipped/delivered
/// tracking is downstream of submission and not modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    RetryPending,
    Failed,
    Completed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::RetryPending => "retry_pending",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "pending" => Ok(DeliveryStatus::Pending),
            "processing" => Ok(DeliveryStatus::Processing),
            "retry_pending" => Ok(DeliveryStatus::RetryPending),
            "failed" => Ok(DeliveryStatus::Failed),
            "completed" => Ok(DeliveryStatus::Completed),
            other => Err(DomainError::validation(format!(
                "unknown delivery status: {other}"
            ))),
        }
    }

    /// No further automatic retries happen in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Processing | DeliveryStatus::Failed | DeliveryStatus::Completed
        )
    }

    /// The pipeline still owns this lineage and may mutate it.
    pub fn is_live(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::RetryPending)
    }

    /// The order reached the partner.
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryStatus::Processing | DeliveryStatus::Completed)
    }
}

impl core::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted delivery record.
///
/// Created by the submission gateway on the first attempt and mutated only
/// by the retry coordinator afterwards. Never deleted; this is the audit
/// trail of delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub status: DeliveryStatus,
    pub partner_order_id: Option<String>,
    /// Locally-derived token sent as the partner-side `order_id`; embeds the
    /// order number plus a coverage suffix when several coverages exist.
    pub idempotency_key: Option<String>,
    /// Attempts already made. Only increases, except on operator manual retry.
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    fn new(tenant_id: TenantId, order_id: OrderId, status: DeliveryStatus) -> Self {
        let now = Utc::now();
        Self {
            id: DeliveryId::new(),
            tenant_id,
            order_id,
            status,
            partner_order_id: None,
            idempotency_key: None,
            retry_count: 0,
            last_retry_at: None,
            next_retry_at: None,
            retry_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// First attempt succeeded: the order is with the partner.
    pub fn processing(
        tenant_id: TenantId,
        order_id: OrderId,
        partner_order_id: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(tenant_id, order_id, DeliveryStatus::Processing);
        record.partner_order_id = Some(partner_order_id.into());
        record.idempotency_key = Some(idempotency_key.into());
        record
    }

    /// First attempt failed with a transient error: schedule the first retry.
    pub fn retry_pending(tenant_id: TenantId, order_id: OrderId, error: &str) -> Self {
        let mut record = Self::new(tenant_id, order_id, DeliveryStatus::RetryPending);
        record.retry_error = Some(truncate_error(error));
        record.next_retry_at = Some(Utc::now() + retry_delay(0));
        record
    }

    /// First attempt failed terminally: persisted for the audit trail.
    pub fn failed(tenant_id: TenantId, order_id: OrderId, error: &str) -> Self {
        let mut record = Self::new(tenant_id, order_id, DeliveryStatus::Failed);
        record.retry_error = Some(truncate_error(error));
        record
    }

    /// Mark the start of a retry attempt.
    pub fn begin_attempt(&mut self) {
        self.last_retry_at = Some(Utc::now());
        self.touch();
    }

    /// A retry reached the partner; the lineage is terminally successful.
    pub fn complete_submission(
        &mut self,
        partner_order_id: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) {
        self.status = DeliveryStatus::Processing;
        self.partner_order_id = Some(partner_order_id.into());
        self.idempotency_key = Some(idempotency_key.into());
        self.next_retry_at = None;
        self.retry_error = None;
        self.touch();
    }

    /// A retry attempt failed.
    ///
    /// Transient failures under the cap re-enter `retry_pending` with the
    /// next backoff delay; everything else is terminal `failed`.
    pub fn record_retry_failure(&mut self, error: &str, retryable: bool) {
        let attempts_made = self.retry_count + 1;
        self.retry_error = Some(truncate_error(error));

        if retryable && !cap_reached(attempts_made) {
            self.retry_count = attempts_made;
            self.status = DeliveryStatus::RetryPending;
            self.next_retry_at = Some(Utc::now() + retry_delay(attempts_made));
        } else {
            self.status = DeliveryStatus::Failed;
            self.next_retry_at = None;
        }
        self.touch();
    }

    /// Operator-initiated retry of a stuck or failed delivery.
    ///
    /// The one place `retry_count` is allowed to go backwards; the normal
    /// schedule applies again from the top.
    pub fn reset_for_manual_retry(&mut self) -> DomainResult<()> {
        if !matches!(
            self.status,
            DeliveryStatus::RetryPending | DeliveryStatus::Failed
        ) {
            return Err(DomainError::invariant(format!(
                "manual retry is not valid from status {}",
                self.status
            )));
        }

        self.retry_count = 0;
        self.status = DeliveryStatus::RetryPending;
        self.next_retry_at = Some(Utc::now() + retry_delay(0));
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn retry_delay(retry_count: u32) -> chrono::Duration {
    chrono::Duration::from_std(delay_for(retry_count)).unwrap_or_default()
}

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_RETRY_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_RETRY_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
