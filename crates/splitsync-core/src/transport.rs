//! Race server transport client.
//!
//! Thin HTTP boundary to the authoritative remote store. The reconciler and
//! outbox only ever see [`RaceTransport`] plus [`TransportError`]; how a
//! deployment authenticates or routes requests stays behind this seam.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::models::TimedEntry;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Timeout for sync reads and writes.
const SYNC_TIMEOUT: Duration = Duration::from_secs(8);
/// Timeout for lightweight existence checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the transport boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync response payload: {0}")]
    InvalidPayload(String),
    #[error("Authentication expired; re-authentication required")]
    AuthExpired,
}

impl TransportError {
    /// Whether the error is safe to retry with the same credentials.
    ///
    /// Everything except credential expiry is treated as transient: retrying
    /// an expired token would spin forever.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthExpired)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Remote snapshot returned by one poll
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    /// Authoritative entry set (may be partial on incremental backends)
    #[serde(default)]
    pub entries: Vec<TimedEntry>,
    /// Deletion tombstones: ids every device must remove
    #[serde(default)]
    pub deleted_ids: Vec<String>,
    /// Devices the server has recently heard from
    #[serde(default)]
    pub device_count: u32,
    /// Highest bib seen, for collaborator bib auto-increment
    #[serde(default)]
    pub highest_bib: u32,
    /// The race itself was deleted server-side; terminal for the session
    #[serde(default)]
    pub deleted: bool,
}

/// Acknowledgement for a delivered entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub ok: bool,
    /// Server accepted the entry but dropped an oversized photo payload
    #[serde(default)]
    pub photo_skipped: bool,
}

/// Lightweight existence probe result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceStatus {
    pub exists: bool,
    #[serde(default)]
    pub entry_count: u32,
}

/// Transport operations consumed by the sync engine.
///
/// Implemented by [`HttpTransport`] in production and by scripted mocks in
/// tests; the engine is generic over it rather than boxing.
pub trait RaceTransport: Send + Sync + 'static {
    fn fetch_entries(
        &self,
        race_id: &str,
        device_id: &str,
        device_name: &str,
    ) -> impl std::future::Future<Output = TransportResult<FetchResponse>> + Send;

    fn send_entry(
        &self,
        race_id: &str,
        entry: &TimedEntry,
    ) -> impl std::future::Future<Output = TransportResult<SendOutcome>> + Send;

    fn delete_entry(
        &self,
        race_id: &str,
        entry_id: &str,
        device_id: &str,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send;

    fn check_race_exists(
        &self,
        race_id: &str,
    ) -> impl std::future::Future<Output = TransportResult<RaceStatus>> + Send;
}

/// HTTP implementation of [`RaceTransport`]
#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> TransportResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let token = token.into();
        if token.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "bearer token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            endpoint,
            token,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn race_url(&self, race_id: &str, suffix: &str) -> String {
        format!("{}/v1/races/{race_id}{suffix}", self.endpoint)
    }

    async fn check_failure(response: reqwest::Response) -> TransportResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED && body_flags_expiry(&body) {
            return Err(TransportError::AuthExpired);
        }
        Err(TransportError::Api(parse_api_error(status, &body)))
    }
}

impl RaceTransport for HttpTransport {
    async fn fetch_entries(
        &self,
        race_id: &str,
        device_id: &str,
        device_name: &str,
    ) -> TransportResult<FetchResponse> {
        let response = self
            .client
            .get(self.race_url(race_id, "/entries"))
            .query(&[("deviceId", device_id), ("deviceName", device_name)])
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .timeout(SYNC_TIMEOUT)
            .send()
            .await?;

        let response = Self::check_failure(response).await?;
        response
            .json::<FetchResponse>()
            .await
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }

    async fn send_entry(&self, race_id: &str, entry: &TimedEntry) -> TransportResult<SendOutcome> {
        let response = self
            .client
            .post(self.race_url(race_id, "/entries"))
            .bearer_auth(&self.token)
            .json(entry)
            .timeout(SYNC_TIMEOUT)
            .send()
            .await?;

        let response = Self::check_failure(response).await?;
        response
            .json::<SendOutcome>()
            .await
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }

    async fn delete_entry(
        &self,
        race_id: &str,
        entry_id: &str,
        device_id: &str,
    ) -> TransportResult<()> {
        let response = self
            .client
            .delete(self.race_url(race_id, &format!("/entries/{entry_id}")))
            .query(&[("deviceId", device_id)])
            .bearer_auth(&self.token)
            .timeout(SYNC_TIMEOUT)
            .send()
            .await?;

        Self::check_failure(response).await?;
        Ok(())
    }

    async fn check_race_exists(&self, race_id: &str) -> TransportResult<RaceStatus> {
        let response = self
            .client
            .get(self.race_url(race_id, ""))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        let response = Self::check_failure(response).await?;
        response
            .json::<RaceStatus>()
            .await
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
    #[serde(default)]
    expired: bool,
}

fn body_flags_expiry(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body).is_ok_and(|payload| payload.expired)
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> TransportResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn http_transport_debug_redacts_token() {
        let transport = HttpTransport::new("https://api.example.com", "secret").unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn http_transport_rejects_empty_token() {
        assert!(HttpTransport::new("https://api.example.com", "  ").is_err());
    }

    #[test]
    fn body_flags_expiry_requires_expired_true() {
        assert!(body_flags_expiry(r#"{"error":"unauthorized","expired":true}"#));
        assert!(!body_flags_expiry(r#"{"error":"unauthorized"}"#));
        assert!(!body_flags_expiry("not json"));
    }

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let message = parse_api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"message":"backend unavailable"}"#,
        );
        assert_eq!(message, "backend unavailable (500)");

        let fallback = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(fallback, "HTTP 502");
    }

    #[test]
    fn fetch_response_tolerates_missing_fields() {
        let response: FetchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.entries.is_empty());
        assert!(!response.deleted);
    }

    #[test]
    fn transient_classification_excludes_auth_expiry() {
        assert!(!TransportError::AuthExpired.is_transient());
        assert!(TransportError::Api("HTTP 500".to_string()).is_transient());
        assert!(TransportError::InvalidPayload("bad json".to_string()).is_transient());
    }
}
