//! Partner client error model.
//!
//! The rendered `Display` text of these errors is what the retry
//! coordinator's classifier pattern-matches, so API errors carry the HTTP
//! status digits and transport failures carry "timed out" / "connection
//! refused" / "network" wording.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartnerError {
    /// Non-2xx response from the partner; body text is kept for diagnosis.
    #[error("partner API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Token endpoint rejected us or returned garbage.
    #[error("partner auth error: {0}")]
    Auth(String),

    /// Transport-level failure (connect, timeout, DNS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// 2xx response whose body did not match the documented shape.
    #[error("response parse error: {0}")]
    Parse(String),
}

impl PartnerError {
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }
}

impl From<reqwest::Error> for PartnerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PartnerError::Network("request timed out".to_string())
        } else if err.is_connect() {
            PartnerError::Network(format!("connection refused: {err}"))
        } else if err.is_decode() {
            PartnerError::Parse(err.to_string())
        } else {
            PartnerError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telarx_pharmacy::classify::is_retryable_message;

    #[test]
    fn api_errors_render_their_status_for_classification() {
        let err = PartnerError::api(503, "upstream unavailable");
        assert!(is_retryable_message(&err.to_string()));

        let err = PartnerError::api(422, "Invalid ZIP code");
        assert!(!is_retryable_message(&err.to_string()));
    }

    #[test]
    fn transport_errors_classify_as_retryable() {
        let err = PartnerError::Network("request timed out".to_string());
        assert!(is_retryable_message(&err.to_string()));
    }
}
