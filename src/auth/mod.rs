//! Trigger request authentication.
//!
//! Three independent gates are applied to every inbound trigger request, in
//! order: a static API key, an optional IP allow-list, and the replay-safe
//! multi-variant HMAC signature (see [`signature`]). Each gate fails closed;
//! verification is pure and touches no job state. Signature verification
//! operates on the raw body bytes exactly as transmitted, never a
//! re-serialized structure.

pub mod signature;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use thiserror::Error;

use std::net::IpAddr;

use crate::config::AuthConfig;

pub use signature::{
    compute_signature, legacy_signing_base, signing_base, verify_trigger_signature,
    SigningVariant, SIGNING_VARIANTS,
};

/// Accepted logical paths for the dispatch trigger endpoint: canonical
/// route, its trailing-slash form, and the legacy alias. A fixed list, never
/// derived from the request.
pub const TRIGGER_PATHS: [&str; 4] = [
    "/api/cron/dispatch",
    "/api/cron/dispatch/",
    "/api/cron",
    "/api/cron/",
];

/// Accepted logical paths for the campaign-creation endpoint.
pub const CAMPAIGN_PATHS: [&str; 2] = ["/api/campaigns", "/api/campaigns/"];

/// Static API key header.
pub const HEADER_API_KEY: &str = "x-cron-key";
/// Timestamp header, with its legacy alias.
pub const HEADER_TIMESTAMP: &str = "x-cron-ts";
pub const HEADER_TIMESTAMP_LEGACY: &str = "x-cron-timestamp";
/// Signature header, with its legacy alias.
pub const HEADER_SIGNATURE: &str = "x-cron-sig";
pub const HEADER_SIGNATURE_LEGACY: &str = "x-cron-signature";

/// Rejection reasons. Every variant maps to 401 at the HTTP layer; the
/// distinction is for logs and tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The API key gate is configured and the header is absent.
    #[error("missing api key header")]
    MissingApiKey,

    /// The supplied API key does not match.
    #[error("invalid api key")]
    InvalidApiKey,

    /// The caller address is not on the allow-list.
    #[error("caller address not allowed")]
    IpNotAllowed,

    /// The timestamp/signature header pair is incomplete.
    #[error("missing signature headers")]
    MissingSignature,

    /// The timestamp header is not numeric.
    #[error("malformed timestamp")]
    MalformedTimestamp,

    /// The timestamp lies outside the accepted window, independent of
    /// signature validity.
    #[error("timestamp outside accepted window")]
    SkewExceeded,

    /// No accepted signing convention matched.
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Authorizes one trigger request.
///
/// `accepted_paths` is the endpoint's fixed logical-path list (e.g.
/// [`TRIGGER_PATHS`]); `body` must be the raw bytes as received.
pub fn authorize(
    config: &AuthConfig,
    method: &str,
    accepted_paths: &[&str],
    headers: &HeaderMap,
    client_ip: Option<IpAddr>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    // Gate 1: static API key.
    if let Some(expected) = &config.api_key {
        let supplied = header_str(headers, HEADER_API_KEY).ok_or(AuthError::MissingApiKey)?;
        if !bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AuthError::InvalidApiKey);
        }
    }

    // Gate 2: IP allow-list.
    if !config.allowed_ips.is_empty() {
        match client_ip {
            Some(ip) if config.allowed_ips.contains(&ip) => {}
            _ => return Err(AuthError::IpNotAllowed),
        }
    }

    // Gate 3: timestamped HMAC signature.
    let ts_raw = header_str(headers, HEADER_TIMESTAMP)
        .or_else(|| header_str(headers, HEADER_TIMESTAMP_LEGACY))
        .ok_or(AuthError::MissingSignature)?;
    let sig = header_str(headers, HEADER_SIGNATURE)
        .or_else(|| header_str(headers, HEADER_SIGNATURE_LEGACY))
        .ok_or(AuthError::MissingSignature)?;

    let ts_value: i64 = ts_raw.parse().map_err(|_| AuthError::MalformedTimestamp)?;
    let ts_secs = if ts_value >= 1_000_000_000_000 {
        ts_value / 1000
    } else {
        ts_value
    };
    if (now.timestamp() - ts_secs).abs() > config.skew_secs {
        return Err(AuthError::SkewExceeded);
    }

    if !verify_trigger_signature(
        &config.hmac_secret,
        method,
        accepted_paths,
        ts_raw,
        sig,
        body,
    ) {
        return Err(AuthError::SignatureMismatch);
    }

    Ok(())
}

/// Extracts a header value as a string slice, if present and valid UTF-8.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
