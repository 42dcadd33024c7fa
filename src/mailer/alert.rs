//! Best-effort admin alerting.
//!
//! Alerts inform an operator about dead-lettered jobs and other conditions
//! needing manual intervention. Delivery is bounded-retry and best-effort:
//! an alerting failure is logged locally and never aborts the dispatch flow.

use std::future::Future;

use thiserror::Error;
use tracing::warn;

/// Alert deliveries attempted before giving up.
const MAX_NOTIFY_ATTEMPTS: u32 = 3;

/// Failure to deliver an alert.
#[derive(Debug, Error)]
#[error("alert delivery failed: {0}")]
pub struct AlertError(pub String);

/// Alert delivery port.
pub trait AlertSink: Send + Sync {
    /// Delivers one alert for the given functional area.
    fn notify(
        &self,
        area: &str,
        error: &str,
        meta: &serde_json::Value,
    ) -> impl Future<Output = Result<(), AlertError>> + Send;
}

/// Sends an alert with bounded retries, swallowing ultimate failure.
pub async fn notify_best_effort<A: AlertSink>(
    sink: &A,
    area: &str,
    error: &str,
    meta: &serde_json::Value,
) {
    for attempt in 1..=MAX_NOTIFY_ATTEMPTS {
        match sink.notify(area, error, meta).await {
            Ok(()) => return,
            Err(e) if attempt < MAX_NOTIFY_ATTEMPTS => {
                warn!(area, attempt, error = %e, "alert delivery failed, retrying");
            }
            Err(e) => {
                warn!(area, error = %e, "alert delivery failed, giving up");
            }
        }
    }
}

/// An alert sink that writes to the log. The default for deployments
/// without a paging integration.
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    async fn notify(
        &self,
        area: &str,
        error: &str,
        meta: &serde_json::Value,
    ) -> Result<(), AlertError> {
        warn!(area, alert = error, meta = %meta, "admin alert");
        Ok(())
    }
}
