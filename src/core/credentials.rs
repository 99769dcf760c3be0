//! Credential acquisition for the model endpoint.
//!
//! A single provider is built at startup and shared read-only by every call
//! session. Secret material is wiped from memory when dropped.

use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroize;

use crate::core::realtime::{RealtimeError, RealtimeResult};

/// Authentication material for one connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Resource key sent in the `api-key` header
    ApiKey(String),
    /// Token sent as `Authorization: Bearer <token>`
    BearerToken(String),
}

impl Credential {
    /// Header name and value for the WebSocket handshake.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Credential::ApiKey(key) => ("api-key", key.clone()),
            Credential::BearerToken(token) => ("Authorization", format!("Bearer {token}")),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
        }
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        match self {
            Credential::ApiKey(secret) | Credential::BearerToken(secret) => secret.zeroize(),
        }
    }
}

/// Source of credentials for the model endpoint.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> RealtimeResult<Credential>;
}

/// Provider backed by a key or token from configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    /// Prefer the API key; fall back to a pre-issued token.
    pub fn from_parts(api_key: Option<&str>, token: Option<&str>) -> RealtimeResult<Self> {
        let credential = match (api_key, token) {
            (Some(key), _) if !key.is_empty() => Credential::ApiKey(key.to_string()),
            (_, Some(token)) if !token.is_empty() => Credential::BearerToken(token.to_string()),
            _ => {
                return Err(RealtimeError::AuthenticationFailed(
                    "an API key or access token is required".to_string(),
                ));
            }
        };
        Ok(Self::new(credential))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self) -> RealtimeResult<Credential> {
        Ok(self.credential.clone())
    }
}
