//! Voice Live connection settings.
//!
//! Values come from the server configuration; the defaults reproduce the
//! telephony tuning the bridge ships with (high VAD threshold, long silence
//! window, deep noise suppression, server-side echo cancellation).

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::realtime::base::{RealtimeError, RealtimeResult, ReconnectionConfig};

/// Default model deployment.
pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o-realtime-preview";

/// Default Voice Live API version.
pub const DEFAULT_API_VERSION: &str = "2025-05-01-preview";

/// Default synthesis voice.
pub const DEFAULT_VOICE: &str = "en-US-Andrew:DragonHDLatestNeural";

/// Default voice type.
pub const DEFAULT_VOICE_TYPE: &str = "azure-standard";

/// Sample rate shared by the telephony stream and the model.
pub const VOICE_LIVE_SAMPLE_RATE: u32 = 24000;

/// Path appended to the AI services endpoint.
const REALTIME_PATH: &str = "voice-live/realtime";

/// Settings for a Voice Live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceLiveConfig {
    /// AI services endpoint, `https://<resource>.cognitiveservices.azure.com/`
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub voice: String,
    pub voice_type: String,
    /// Server VAD activation threshold (0.0 to 1.0)
    pub vad_threshold: f32,
    /// Silence that ends a user turn
    pub silence_duration_ms: u32,
    pub noise_reduction: String,
    pub echo_cancellation: String,
    /// Enables user transcription events when set
    pub input_transcription_model: Option<String>,
    #[serde(default = "ReconnectionConfig::disabled")]
    pub reconnection: ReconnectionConfig,
}

impl Default for VoiceLiveConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            voice_type: DEFAULT_VOICE_TYPE.to_string(),
            vad_threshold: 0.8,
            silence_duration_ms: 800,
            noise_reduction: "azure_deep_noise_suppression".to_string(),
            echo_cancellation: "server_echo_cancellation".to_string(),
            input_transcription_model: None,
            reconnection: ReconnectionConfig::disabled(),
        }
    }
}

impl VoiceLiveConfig {
    /// Build the realtime WebSocket URL from the service endpoint.
    ///
    /// `https` becomes `wss` and `http` becomes `ws`; a `ws`/`wss` endpoint is
    /// used as given. Any path on the endpoint is kept as a prefix.
    pub fn ws_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(self.endpoint.trim()).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!(
                "invalid AI services endpoint '{}': {}",
                self.endpoint, e
            ))
        })?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "unsupported endpoint scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::InvalidConfiguration("cannot rewrite endpoint scheme".to_string())
        })?;

        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}/{REALTIME_PATH}"));
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version)
            .append_pair("model", &self.deployment);

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> VoiceLiveConfig {
        VoiceLiveConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = VoiceLiveConfig::default();
        assert_eq!(config.deployment, "gpt-4o-realtime-preview");
        assert_eq!(config.api_version, "2025-05-01-preview");
        assert_eq!(config.voice, "en-US-Andrew:DragonHDLatestNeural");
        assert_eq!(config.vad_threshold, 0.8);
        assert_eq!(config.silence_duration_ms, 800);
        assert!(!config.reconnection.is_enabled());
    }

    #[test]
    fn test_ws_url_from_https_endpoint() {
        let url = config("https://contoso.cognitiveservices.azure.com/")
            .ws_url()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://contoso.cognitiveservices.azure.com/voice-live/realtime?api-version=2025-05-01-preview&model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_ws_url_from_local_endpoint() {
        let url = config("http://127.0.0.1:9000").ws_url().unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/voice-live/realtime");
        assert_eq!(url.port(), Some(9000));
    }

    #[test]
    fn test_ws_url_rejects_bad_endpoints() {
        assert!(config("").ws_url().is_err());
        assert!(config("ftp://example.com").ws_url().is_err());
    }
}
