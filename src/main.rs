use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campaign_dispatch::config::{AuthConfig, EngineConfig};
use campaign_dispatch::mailer::{LoggingMailer, TracingAlertSink};
use campaign_dispatch::server::{build_router, AppState};
use campaign_dispatch::store::MemoryStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_dispatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = EngineConfig::from_env();
    let auth = AuthConfig::from_env();
    if auth.hmac_secret.is_empty() {
        tracing::warn!("CRON_HMAC_SECRET is not set; trigger requests will not verify");
    }

    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(LoggingMailer),
        Arc::new(TracingAlertSink),
        engine,
        auth,
    );
    let app = build_router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
