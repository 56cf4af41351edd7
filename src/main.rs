//! Campus Market - Campus Marketplace Backend

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_market::config::Settings;
use campus_market::events::EventPublisher;
use campus_market::gateway::FlutterwaveGateway;
use campus_market::http::{self, AppState};
use campus_market::reconcile::Reconciler;
use campus_market::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    let db = PgPoolOptions::new().max_connections(10).connect(&settings.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &settings.nats_url {
        Some(url) => async_nats::connect(url).await.ok(),
        None => None,
    };
    let events = EventPublisher::new(nats);

    let store = Arc::new(PgStore::new(db));
    let gateway = Arc::new(FlutterwaveGateway::new(settings.gateway.clone())?);
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        gateway,
        events.clone(),
    ));
    let state = AppState {
        store,
        reconciler,
        events,
        gateway_environment: settings.gateway.environment.clone(),
    };

    let app = http::router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 Campus Market listening on 0.0.0.0:{}", settings.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?, app)
        .await?;
    Ok(())
}
