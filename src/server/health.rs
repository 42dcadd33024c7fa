//! Health check endpoint for liveness probes.
//!
//! Returns 200 OK if the server is running. Intended for load balancers and
//! orchestration systems.

use axum::http::StatusCode;

/// Health check handler.
///
/// Returns 200 OK with the text "OK" to verify that the server is running
/// and accepting connections.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
