use axum::{routing::get, Json, Router};
use dlq_handler_rs::{start_dlq_consumer, DlqContext};
use event_bus::{EventBus, InMemoryBus, NatsBus};
use pipeline_config::{BusKind, PipelineConfig};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use warehouse::PostgresWarehouse;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match PipelineConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let database_url = match config.require_database_url() {
        Ok(url) => url.to_string(),
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8085".to_string())
        .parse()
        .expect("PORT must be a valid u16");

    tracing::info!("Connecting to warehouse...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to warehouse database");

    tracing::info!("Running migrations...");
    warehouse::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let ctx = Arc::new(DlqContext {
        warehouse: Arc::new(PostgresWarehouse::new(pool)),
    });

    let bus: Arc<dyn EventBus> = match config.bus_kind {
        BusKind::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusKind::Nats => {
            tracing::info!(url = %config.nats_url, "Connecting to NATS");
            let client = async_nats::connect(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            Arc::new(NatsBus::new(client))
        }
    };

    start_dlq_consumer(ctx, bus);

    let app = Router::new().route("/api/health", get(health)).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("DLQ handler listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "dlq-handler",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
