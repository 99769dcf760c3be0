//! Call automation REST client.
//!
//! Talks to the Azure Communication Services call-automation API. Requests
//! are authenticated with HMAC-SHA256 access-key signing: the signature covers
//! the verb, path and query, `x-ms-date`, host and the SHA-256 of the body.

use async_trait::async_trait;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use url::Url;
use zeroize::Zeroizing;

/// Call automation API version.
pub const ACS_API_VERSION: &str = "2024-09-15";

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum CallAutomationError {
    #[error("Invalid call automation configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Call automation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Call automation API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected call automation response: {0}")]
    InvalidResponse(String),
}

pub type CallAutomationResult<T> = Result<T, CallAutomationError>;

// =============================================================================
// Models
// =============================================================================

/// A participant identifier as used by the call automation API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<PhoneNumberIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumberIdentifier {
    pub value: String,
}

impl CommunicationIdentifier {
    pub fn phone(number: &str) -> Self {
        Self {
            raw_id: Some(format!("4:{number}")),
            kind: Some("phoneNumber".to_string()),
            phone_number: Some(PhoneNumberIdentifier {
                value: number.to_string(),
            }),
        }
    }

    pub fn phone_number_value(&self) -> Option<&str> {
        self.phone_number.as_ref().map(|p| p.value.as_str())
    }
}

/// Media streaming options for answering a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStreamingOptions {
    pub transport_url: String,
    pub transport_type: String,
    pub content_type: String,
    pub audio_channel_type: String,
    pub start_media_streaming: bool,
    pub enable_bidirectional: bool,
    pub audio_format: String,
}

impl MediaStreamingOptions {
    /// Bidirectional 24 kHz mono PCM over a WebSocket, mixed channel.
    pub fn bidirectional_pcm24k(transport_url: impl Into<String>) -> Self {
        Self {
            transport_url: transport_url.into(),
            transport_type: "websocket".to_string(),
            content_type: "audio".to_string(),
            audio_channel_type: "mixed".to_string(),
            start_media_streaming: true,
            enable_bidirectional: true,
            audio_format: "Pcm24KMono".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerCallRequest {
    pub incoming_call_context: String,
    pub callback_uri: String,
    pub operation_context: String,
    pub media_streaming_options: MediaStreamingOptions,
}

/// Properties of an established call connection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallConnectionProperties {
    #[serde(default)]
    pub call_connection_id: String,
    #[serde(default)]
    pub call_connection_state: Option<String>,
    #[serde(default)]
    pub source: Option<CommunicationIdentifier>,
    #[serde(default)]
    pub targets: Vec<CommunicationIdentifier>,
    #[serde(default)]
    pub media_streaming_subscription: Option<Value>,
}

impl CallConnectionProperties {
    /// First PSTN number among the call's participants.
    pub fn caller_phone_number(&self) -> Option<&str> {
        self.targets
            .iter()
            .chain(self.source.iter())
            .find_map(CommunicationIdentifier::phone_number_value)
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Call-control operations consumed by the webhooks and the call plugin.
#[async_trait]
pub trait CallAutomation: Send + Sync {
    async fn answer_call(
        &self,
        request: &AnswerCallRequest,
    ) -> CallAutomationResult<CallConnectionProperties>;

    async fn get_call_properties(
        &self,
        call_connection_id: &str,
    ) -> CallAutomationResult<CallConnectionProperties>;

    /// Leave the call, or end it for everyone.
    async fn hang_up(&self, call_connection_id: &str, for_everyone: bool)
    -> CallAutomationResult<()>;

    /// Transfer the call to a PSTN number.
    async fn transfer(
        &self,
        call_connection_id: &str,
        target_phone_number: &str,
        operation_context: &str,
    ) -> CallAutomationResult<()>;
}

// =============================================================================
// ACS Client
// =============================================================================

/// HMAC-authenticated call automation client.
pub struct AcsCallAutomation {
    endpoint: Url,
    access_key: Zeroizing<Vec<u8>>,
    http: Client,
}

impl std::fmt::Debug for AcsCallAutomation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcsCallAutomation")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_key", &"[REDACTED]")
            .finish()
    }
}

impl AcsCallAutomation {
    /// Create a client for `endpoint` using a base64 access key.
    pub fn new(endpoint: &str, access_key: &str) -> CallAutomationResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            CallAutomationError::InvalidConfiguration(format!("invalid ACS endpoint: {e}"))
        })?;
        if endpoint.host_str().is_none() {
            return Err(CallAutomationError::InvalidConfiguration(
                "ACS endpoint has no host".to_string(),
            ));
        }
        let access_key = BASE64_STANDARD.decode(access_key.trim()).map_err(|e| {
            CallAutomationError::InvalidConfiguration(format!("access key is not base64: {e}"))
        })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                CallAutomationError::InvalidConfiguration(format!(
                    "failed to create HTTP client: {e}"
                ))
            })?;

        Ok(Self {
            endpoint,
            access_key: Zeroizing::new(access_key),
            http,
        })
    }

    fn url(&self, path: &str) -> CallAutomationResult<Url> {
        let mut url = self
            .endpoint
            .join(path)
            .map_err(|e| CallAutomationError::InvalidConfiguration(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("api-version", ACS_API_VERSION);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&impl Serialize>,
    ) -> CallAutomationResult<String> {
        let body = match body {
            Some(body) => serde_json::to_vec(body)
                .map_err(|e| CallAutomationError::Signing(e.to_string()))?,
            None => Vec::new(),
        };
        let date = rfc1123_now()?;
        let headers = sign_request(&self.access_key, method.as_str(), &url, &date, &body)?;

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("x-ms-date", &date)
            .header("x-ms-content-sha256", &headers.content_hash)
            .header("Authorization", &headers.authorization);
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        tracing::debug!("ACS {} {}", method, url.path());
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(CallAutomationError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl CallAutomation for AcsCallAutomation {
    async fn answer_call(
        &self,
        request: &AnswerCallRequest,
    ) -> CallAutomationResult<CallConnectionProperties> {
        let url = self.url("calling/callConnections:answer")?;
        let text = self.send(Method::POST, url, Some(request)).await?;
        serde_json::from_str(&text).map_err(|e| CallAutomationError::InvalidResponse(e.to_string()))
    }

    async fn get_call_properties(
        &self,
        call_connection_id: &str,
    ) -> CallAutomationResult<CallConnectionProperties> {
        let url = self.url(&format!("calling/callConnections/{call_connection_id}"))?;
        let text = self.send(Method::GET, url, None::<&Value>).await?;
        serde_json::from_str(&text).map_err(|e| CallAutomationError::InvalidResponse(e.to_string()))
    }

    async fn hang_up(
        &self,
        call_connection_id: &str,
        for_everyone: bool,
    ) -> CallAutomationResult<()> {
        if for_everyone {
            let url = self.url(&format!(
                "calling/callConnections/{call_connection_id}:terminate"
            ))?;
            self.send(Method::POST, url, Some(&serde_json::json!({})))
                .await?;
        } else {
            let url = self.url(&format!("calling/callConnections/{call_connection_id}"))?;
            self.send(Method::DELETE, url, None::<&Value>).await?;
        }
        Ok(())
    }

    async fn transfer(
        &self,
        call_connection_id: &str,
        target_phone_number: &str,
        operation_context: &str,
    ) -> CallAutomationResult<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct TransferRequest<'a> {
            target_participant: CommunicationIdentifier,
            operation_context: &'a str,
        }

        let url = self.url(&format!(
            "calling/callConnections/{call_connection_id}:transferToParticipant"
        ))?;
        let body = TransferRequest {
            target_participant: CommunicationIdentifier::phone(target_phone_number),
            operation_context,
        };
        self.send(Method::POST, url, Some(&body)).await?;
        Ok(())
    }
}

// =============================================================================
// Signing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub content_hash: String,
    pub authorization: String,
}

fn rfc1123_now() -> CallAutomationResult<String> {
    format_rfc1123(OffsetDateTime::now_utc())
}

/// Format a timestamp the way `x-ms-date` expects it.
pub fn format_rfc1123(at: OffsetDateTime) -> CallAutomationResult<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC)
        .format(&format)
        .map_err(|e| CallAutomationError::Signing(e.to_string()))
}

/// Compute the content hash and `Authorization` header for a request.
pub fn sign_request(
    key: &[u8],
    method: &str,
    url: &Url,
    date: &str,
    body: &[u8],
) -> CallAutomationResult<SignedHeaders> {
    let content_hash = BASE64_STANDARD.encode(Sha256::digest(body));

    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(CallAutomationError::Signing("URL has no host".to_string())),
    };
    let path_and_query = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let string_to_sign = format!("{method}\n{path_and_query}\n{date};{host};{content_hash}");

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CallAutomationError::Signing(format!("Failed to create HMAC: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    Ok(SignedHeaders {
        content_hash,
        authorization: format!(
            "HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={signature}"
        ),
    })
}
