use anyhow::Context;
use axum::{routing::get, Router};
use motion_ingestor::codec::FrameCodec;
use motion_ingestor::config::{Config, StoreBackend};
use motion_ingestor::db::{self, PgLocationStore};
use motion_ingestor::metrics;
use motion_ingestor::mqtt::{self, BrokerSettings};
use motion_ingestor::notify::{FcmNotifier, LogNotifier, Notifier, ServiceAccountTokens};
use motion_ingestor::pipeline::IngestPipeline;
use motion_ingestor::query::TrackingQueries;
use motion_ingestor::rest;
use motion_ingestor::store::{LocationStore, MemoryStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    info!("Starting motion ingestor");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("MQTT topic: {}", config.mqtt_topic);
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics().context("failed to register metrics")?;

    let store: Arc<dyn LocationStore> = match config.store_backend {
        StoreBackend::Postgres => {
            info!(
                "Database: {}",
                config.database_url.split('@').last().unwrap_or("***")
            );
            let pool = db::make_pool(&config.database_url)
                .await
                .context("failed to connect to database")?;
            Arc::new(PgLocationStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, history is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.fcm {
        Some(fcm) => {
            info!("Push notifications via FCM project {}", fcm.project_id);
            let tokens = ServiceAccountTokens::from_file(&fcm.service_account_file)
                .context("failed to load FCM service account")?;
            Arc::new(
                FcmNotifier::new(&fcm.project_id, Arc::new(tokens))
                    .context("failed to build FCM client")?,
            )
        }
        None => {
            warn!("FCM not configured, movement alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let codec = FrameCodec::new(&config.frame_key)?;
    let pipeline = IngestPipeline::new(codec, store.clone(), notifier, config.retry);

    let broker = BrokerSettings {
        host: config.mqtt_broker.clone(),
        port: config.mqtt_port,
        client_id: config.mqtt_client_id.clone(),
        persistent_session: config.mqtt_persistent_session,
        credentials: config.mqtt_credentials.clone(),
        topic: config.mqtt_topic.clone(),
    };
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(broker, &pipeline).await {
            error!("MQTT task failed: {}", e);
        }
    });

    // Build HTTP app with read API, health and metrics endpoints
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .merge(rest::create_router(TrackingQueries::new(store)));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
