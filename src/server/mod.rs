//! HTTP server for the dispatch engine.
//!
//! Endpoints:
//!
//! - `POST /api/cron/dispatch` (+ trailing-slash and legacy `/api/cron`
//!   aliases) — authenticated dispatch trigger; runs one tick
//! - `POST /api/campaigns` — authenticated campaign creation (job producer)
//! - `GET /api/jobs/{id}` — read-only job inspection
//! - `GET /health` — liveness probe

use std::sync::Arc;

pub mod campaigns;
pub mod health;
pub mod jobs;
pub mod trigger;

pub use campaigns::create_campaign_handler;
pub use health::health_handler;
pub use jobs::job_handler;
pub use trigger::trigger_handler;

use axum::routing::{get, post};
use axum::Router;

use crate::config::{AuthConfig, EngineConfig};
use crate::dispatch::dedup::DedupStore;
use crate::mailer::{AlertSink, MailSender};
use crate::store::{ConsentSource, JobStore, SendLogStore, SuppressionSource};
use crate::tick::TickCoordinator;

/// Shared application state, passed to handlers via Axum's `State`
/// extractor. Cheap to clone.
pub struct AppState<S, M, A> {
    inner: Arc<AppStateInner<S, M, A>>,
}

impl<S, M, A> Clone for AppState<S, M, A> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<S, M, A> {
    coordinator: TickCoordinator<S, M, A>,
    store: Arc<S>,
    auth: AuthConfig,
}

impl<S, M, A> AppState<S, M, A>
where
    S: JobStore + DedupStore + SendLogStore + ConsentSource + SuppressionSource,
    M: MailSender,
    A: AlertSink,
{
    /// Wires the coordinator and auth config into one state value.
    pub fn new(
        store: Arc<S>,
        mailer: Arc<M>,
        alerts: Arc<A>,
        engine: EngineConfig,
        auth: AuthConfig,
    ) -> Self {
        let coordinator = TickCoordinator::new(store.clone(), mailer, alerts, engine);
        AppState {
            inner: Arc::new(AppStateInner {
                coordinator,
                store,
                auth,
            }),
        }
    }

    pub fn coordinator(&self) -> &TickCoordinator<S, M, A> {
        &self.inner.coordinator
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.inner.auth
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S, M, A>(state: AppState<S, M, A>) -> Router
where
    S: JobStore + DedupStore + SendLogStore + ConsentSource + SuppressionSource + 'static,
    M: MailSender + 'static,
    A: AlertSink + 'static,
{
    Router::new()
        .route("/api/cron/dispatch", post(trigger_handler::<S, M, A>))
        .route("/api/cron/dispatch/", post(trigger_handler::<S, M, A>))
        .route("/api/cron", post(trigger_handler::<S, M, A>))
        .route("/api/cron/", post(trigger_handler::<S, M, A>))
        .route("/api/campaigns", post(create_campaign_handler::<S, M, A>))
        .route("/api/jobs/{id}", get(job_handler::<S, M, A>))
        .route("/health", get(health_handler))
        .with_state(state)
}
