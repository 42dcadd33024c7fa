//! Campaign creation endpoint — the producer of dispatch jobs.
//!
//! Guarded by the same gate stack as the trigger endpoint (with its own
//! accepted-path list for signing bases). Validation failures reject the
//! request before any document is written; a campaign that validates is
//! enqueued as a pending job, due immediately unless scheduled.

use std::collections::{BTreeMap, BTreeSet};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{authorize, AuthError, CAMPAIGN_PATHS};
use crate::dispatch::dedup::DedupStore;
use crate::mailer::{AlertSink, MailSender};
use crate::store::{ConsentSource, JobStore, SendLogStore, StoreError, SuppressionSource};
use crate::types::{CampaignJob, JobId};

use super::trigger::client_ip;
use super::AppState;

/// Campaign creation request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub subject: String,
    pub html: String,

    /// Topic flags; only topics set to `true` restrict the audience.
    #[serde(default)]
    pub materias: BTreeMap<String, bool>,

    /// Absent means "send on the next tick".
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub test_only: bool,

    #[serde(default)]
    pub only_commercial: bool,
}

/// Response for a created campaign.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignResponse {
    pub ok: bool,
    pub id: JobId,
    pub scheduled_at: DateTime<Utc>,
}

/// Errors that can occur when creating a campaign.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// Authentication failed.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// The body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A campaign with the same content and schedule already exists.
    #[error("campaign already exists: {0}")]
    Duplicate(String),

    /// The store failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CampaignError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AlreadyExists(id) => CampaignError::Duplicate(id),
            other => CampaignError::Store(other),
        }
    }
}

impl IntoResponse for CampaignError {
    fn into_response(self) -> Response {
        let status = match &self {
            CampaignError::Auth(_) => StatusCode::UNAUTHORIZED,
            CampaignError::InvalidJson(_) | CampaignError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }
            CampaignError::Duplicate(_) => StatusCode::CONFLICT,
            CampaignError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "ok": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Campaign creation handler.
pub async fn create_campaign_handler<S, M, A>(
    State(state): State<AppState<S, M, A>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateCampaignResponse>), CampaignError>
where
    S: JobStore + DedupStore + SendLogStore + ConsentSource + SuppressionSource + 'static,
    M: MailSender + 'static,
    A: AlertSink + 'static,
{
    if let Err(error) = authorize(
        state.auth(),
        "POST",
        &CAMPAIGN_PATHS,
        &headers,
        client_ip(&headers),
        &body,
        Utc::now(),
    ) {
        warn!(path = %uri.path(), %error, "campaign creation rejected");
        return Err(error.into());
    }

    let request: CreateCampaignRequest = serde_json::from_slice(&body)?;
    if request.subject.trim().is_empty() {
        return Err(CampaignError::MissingField("subject"));
    }
    if request.html.trim().is_empty() {
        return Err(CampaignError::MissingField("html"));
    }

    let now = Utc::now();
    let scheduled_at = request.scheduled_at.unwrap_or(now);
    let topic_filter: BTreeSet<String> = request
        .materias
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect();

    let id = JobId::derived(&request.subject, &request.html, &scheduled_at);
    let job = CampaignJob::new(
        id.clone(),
        request.subject,
        request.html,
        topic_filter,
        scheduled_at,
        request.test_only,
        request.only_commercial,
        now,
    );

    state.store().insert_job(job).await?;
    info!(job_id = %id, scheduled_at = %scheduled_at, "campaign enqueued");

    Ok((
        StatusCode::CREATED,
        Json(CreateCampaignResponse {
            ok: true,
            id,
            scheduled_at,
        }),
    ))
}
