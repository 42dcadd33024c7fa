//! Dispatch trigger endpoint.
//!
//! The external scheduler POSTs here to run one dispatch tick. The request
//! is authenticated against the full gate stack (API key, IP allow-list,
//! multi-variant HMAC) before any job is touched; signature verification
//! runs over the raw body bytes exactly as transmitted.

use std::net::IpAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{authorize, AuthError, TRIGGER_PATHS};
use crate::dispatch::dedup::DedupStore;
use crate::mailer::{AlertSink, MailSender};
use crate::store::{ConsentSource, JobStore, SendLogStore, StoreError, SuppressionSource};
use crate::tick::JobOutcome;

use super::AppState;

/// Response body for a successful tick.
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub ok: bool,
    pub processed: usize,
    pub results: Vec<JobOutcome>,
}

/// Errors that can occur when handling a trigger request.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Authentication failed; no job was touched.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// The tick failed at the store level.
    #[error("dispatch failed: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TriggerError::Auth(_) => StatusCode::UNAUTHORIZED,
            TriggerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "ok": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Trigger handler: authenticate, run one tick, report per-job outcomes.
pub async fn trigger_handler<S, M, A>(
    State(state): State<AppState<S, M, A>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TriggerResponse>, TriggerError>
where
    S: JobStore + DedupStore + SendLogStore + ConsentSource + SuppressionSource + 'static,
    M: MailSender + 'static,
    A: AlertSink + 'static,
{
    if let Err(error) = authorize(
        state.auth(),
        "POST",
        &TRIGGER_PATHS,
        &headers,
        client_ip(&headers),
        &body,
        Utc::now(),
    ) {
        warn!(path = %uri.path(), %error, "trigger rejected");
        return Err(error.into());
    }

    let summary = state.coordinator().run_tick().await?;
    info!(processed = summary.processed, "tick finished");

    Ok(Json(TriggerResponse {
        ok: true,
        processed: summary.processed,
        results: summary.results,
    }))
}

/// Extracts the caller address from the `x-forwarded-for` chain.
///
/// The first entry is the originating client as reported by the fronting
/// proxy; without the header there is no usable caller address.
pub(super) fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .and_then(|first| first.trim().parse().ok())
}
