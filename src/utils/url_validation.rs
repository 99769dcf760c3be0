//! URL validation utilities
//!
//! Configuration carries several URLs that end up in outbound requests or are
//! handed to the telephony service for callbacks. This module checks them once
//! at startup:
//! - Callback hosts must be absolute HTTPS URLs with a public host
//! - Service endpoints (model endpoint, MCP servers) must be HTTP(S) with a host
//!
//! It also derives the media streaming WebSocket URL from the callback host.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Path of the telephony media WebSocket.
pub const MEDIA_STREAM_PATH: &str = "/ws";

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL scheme must be HTTP or HTTPS, got: {0}")]
    HttpRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL points to a private/internal IP address: {0}")]
    PrivateIpDetected(IpAddr),
}

/// Checks if an IPv4 address is private/internal
///
/// Private addresses include loopback, RFC 1918 ranges, link-local,
/// broadcast, unspecified, documentation ranges and CGNAT shared space.
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    if ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
    {
        return true;
    }
    // Shared address space (CGNAT) 100.64.0.0/10
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Checks if an IPv6 address is private/internal
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let segments = ip.segments();
    // Link-local (fe80::/10)
    if segments[0] & 0xFFC0 == 0xFE80 {
        return true;
    }
    // Unique local address (fc00::/7)
    if segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }
    if let Some(ipv4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&ipv4);
    }
    false
}

/// Checks if an IP address is private/internal
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

/// Validates the public callback host handed to the telephony service.
///
/// The telephony service calls back over the internet, so the URL must be
/// absolute HTTPS and must not name a private IP literal. Hostnames are not
/// resolved.
pub fn validate_callback_host(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;

    if parsed.scheme() != "https" {
        return Err(UrlValidationError::HttpsRequired(
            parsed.scheme().to_string(),
        ));
    }

    let ip = match parsed.host() {
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip),
        Some(url::Host::Domain(_)) => return Ok(parsed),
        None => return Err(UrlValidationError::MissingHost),
    };
    if is_private_ip(&ip) {
        warn!(resolved_ip = %ip, "Callback host is a private IP address");
        return Err(UrlValidationError::PrivateIpDetected(ip));
    }
    Ok(parsed)
}

/// Validates an outbound service endpoint (HTTP or HTTPS with a host).
pub fn validate_service_url(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(UrlValidationError::HttpRequired(other.to_string())),
    }
    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }
    Ok(parsed)
}

/// Media streaming URL for a callback base, `wss://<host>[:port]/ws`.
pub fn media_stream_url(callback_base: &str) -> Result<String, UrlValidationError> {
    let parsed = Url::parse(callback_base)?;
    let host = parsed.host_str().ok_or(UrlValidationError::MissingHost)?;
    Ok(match parsed.port() {
        Some(port) => format!("wss://{host}:{port}{MEDIA_STREAM_PATH}"),
        None => format!("wss://{host}{MEDIA_STREAM_PATH}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ipv4() {
        assert!(is_private_ipv4(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(10, 1, 2, 3)));
        assert!(is_private_ipv4(&Ipv4Addr::new(192, 168, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(100, 64, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_private_ipv6() {
        assert!(is_private_ipv6(&Ipv6Addr::LOCALHOST));
        assert!(is_private_ipv6(&"fe80::1".parse().unwrap()));
        assert!(is_private_ipv6(&"fd00::1".parse().unwrap()));
        assert!(is_private_ipv6(&"::ffff:10.0.0.1".parse().unwrap()));
        assert!(!is_private_ipv6(&"2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn test_validate_callback_host() {
        assert!(validate_callback_host("https://abc.ngrok.app").is_ok());
        assert!(validate_callback_host("https://8.8.8.8").is_ok());
        assert!(matches!(
            validate_callback_host("http://abc.ngrok.app"),
            Err(UrlValidationError::HttpsRequired(_))
        ));
        assert!(matches!(
            validate_callback_host("https://10.0.0.5"),
            Err(UrlValidationError::PrivateIpDetected(_))
        ));
        assert!(matches!(
            validate_callback_host("abc.ngrok.app"),
            Err(UrlValidationError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_validate_service_url() {
        assert!(validate_service_url("http://localhost:9000/mcp").is_ok());
        assert!(validate_service_url("https://res.cognitiveservices.azure.com/").is_ok());
        assert!(matches!(
            validate_service_url("ftp://example.com"),
            Err(UrlValidationError::HttpRequired(_))
        ));
        assert!(validate_service_url("not a url").is_err());
    }

    #[test]
    fn test_media_stream_url() {
        assert_eq!(
            media_stream_url("https://abc.ngrok.app/").unwrap(),
            "wss://abc.ngrok.app/ws"
        );
        assert_eq!(
            media_stream_url("https://bridge.example.com:8443/base").unwrap(),
            "wss://bridge.example.com:8443/ws"
        );
    }
}
