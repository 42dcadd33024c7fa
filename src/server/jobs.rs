//! Job inspection endpoint for observability.
//!
//! Provides a read-only view of a job document for debugging and monitoring.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::dispatch::dedup::DedupStore;
use crate::mailer::{AlertSink, MailSender};
use crate::store::{ConsentSource, JobStore, SendLogStore, StoreError, SuppressionSource};
use crate::types::{CampaignJob, JobId};

use super::AppState;

/// Errors that can occur when fetching a job.
#[derive(Debug, Error)]
pub enum JobFetchError {
    /// No job with that id exists.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for JobFetchError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobFetchError::NotFound(_) => StatusCode::NOT_FOUND,
            JobFetchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "ok": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Job inspection handler: returns the job document as JSON.
pub async fn job_handler<S, M, A>(
    State(state): State<AppState<S, M, A>>,
    Path(id): Path<String>,
) -> Result<Json<CampaignJob>, JobFetchError>
where
    S: JobStore + DedupStore + SendLogStore + ConsentSource + SuppressionSource + 'static,
    M: MailSender + 'static,
    A: AlertSink + 'static,
{
    let id = JobId::new(id);
    let fetched = state
        .store()
        .fetch_job(&id)
        .await?
        .ok_or_else(|| JobFetchError::NotFound(id.to_string()))?;
    Ok(Json(fetched.job))
}
