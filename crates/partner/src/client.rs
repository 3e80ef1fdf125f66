//! HTTP client for the fulfillment partner.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use telarx_pharmacy::request::{OrderPayload, PatientPayload};

use crate::error::PartnerError;
use crate::types::{DataEnvelope, PartnerOrder, PartnerPatient, PatientQueryResponse, TokenResponse};

/// Refresh the cached token this long before it actually expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Partner connection settings.
#[derive(Debug, Clone)]
pub struct PartnerConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Per-request timeout; a timeout classifies as a retryable network error.
    pub timeout: Duration,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4545".to_string(),
            token_url: "http://localhost:4545/oauth/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl PartnerConfig {
    /// Read settings from the environment.
    ///
    /// Credentials are hard-required; URLs fall back to local defaults for
    /// development.
    pub fn from_env() -> Self {
        let base_url = std::env::var("TELARX_PARTNER_URL")
            .unwrap_or_else(|_| "http://localhost:4545".to_string());
        let token_url = std::env::var("TELARX_PARTNER_TOKEN_URL")
            .unwrap_or_else(|_| format!("{}/oauth/token", base_url.trim_end_matches('/')));

        Self {
            base_url,
            token_url,
            client_id: std::env::var("TELARX_PARTNER_CLIENT_ID")
                .expect("TELARX_PARTNER_CLIENT_ID must be set"),
            client_secret: std::env::var("TELARX_PARTNER_CLIENT_SECRET")
                .expect("TELARX_PARTNER_CLIENT_SECRET must be set"),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = client_id.into();
        self.client_secret = client_secret.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The partner operations the pipeline needs.
///
/// The submission gateway and retry coordinator depend on this trait, not on
/// the HTTP client, so tests can script partner behavior.
#[async_trait]
pub trait PartnerApi: Send + Sync {
    /// Look a patient up by email. `None` means "not found" (the partner
    /// returns an empty `data` list).
    async fn find_patient_by_email(&self, email: &str)
    -> Result<Option<PartnerPatient>, PartnerError>;

    async fn create_patient(&self, payload: &PatientPayload)
    -> Result<PartnerPatient, PartnerError>;

    async fn submit_order(&self, payload: &OrderPayload) -> Result<PartnerOrder, PartnerError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

/// reqwest-backed [`PartnerApi`] with bearer-token caching.
pub struct HttpPartnerClient {
    http: reqwest::Client,
    config: PartnerConfig,
    token: RwLock<Option<CachedToken>>,
}

impl HttpPartnerClient {
    pub fn new(config: PartnerConfig) -> Result<Self, PartnerError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PartnerError::Network(format!("network client init failed: {e}")))?;

        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Return a cached bearer token, fetching a fresh one when absent or
    /// within the refresh margin of expiry.
    async fn bearer_token(&self) -> Result<String, PartnerError> {
        let now = Utc::now();
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .json(&serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "grant_type": "client_credentials",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PartnerError::Auth(format!(
                "token endpoint returned {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PartnerError::Auth(format!("token response malformed: {e}")))?;

        let cached = CachedToken {
            token: token.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(token.expires_in as i64),
        };
        debug!(expires_at = %cached.expires_at, "refreshed partner bearer token");
        *self.token.write().await = Some(cached);

        Ok(token.access_token)
    }

    async fn read_failure(response: reqwest::Response) -> PartnerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        PartnerError::api(status, body)
    }
}

#[async_trait]
impl PartnerApi for HttpPartnerClient {
    async fn find_patient_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PartnerPatient>, PartnerError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(self.endpoint("/patients"))
            .bearer_auth(token)
            .query(&[("email", email)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }

        let parsed: PatientQueryResponse = response
            .json()
            .await
            .map_err(|e| PartnerError::Parse(e.to_string()))?;
        Ok(parsed.data.into_iter().next())
    }

    async fn create_patient(
        &self,
        payload: &PatientPayload,
    ) -> Result<PartnerPatient, PartnerError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(self.endpoint("/patients"))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }

        let parsed: DataEnvelope<PartnerPatient> = response
            .json()
            .await
            .map_err(|e| PartnerError::Parse(e.to_string()))?;
        info!(partner_patient_id = %parsed.data.uuid, "created partner patient");
        Ok(parsed.data)
    }

    async fn submit_order(&self, payload: &OrderPayload) -> Result<PartnerOrder, PartnerError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(self.endpoint("/orders"))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }

        let parsed: DataEnvelope<PartnerOrder> = response
            .json()
            .await
            .map_err(|e| PartnerError::Parse(e.to_string()))?;
        info!(
            partner_order_id = %parsed.data.uuid,
            order_id = ?payload.order_id,
            "submitted order to partner"
        );
        Ok(parsed.data)
    }
}
