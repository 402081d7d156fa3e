use axum::{routing::get, Json, Router};
use event_bus::{EventBus, InMemoryBus, NatsBus};
use pipeline_config::{BusKind, PipelineConfig};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use warehouse::PostgresWarehouse;
use writer_rs::{start_writer_consumer, WriterContext};

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
        .unwrap_or_else(|_| "8084".to_string())
        .parse()
        .expect("PORT must be a valid u16");

    tracing::info!("Connecting to warehouse...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to warehouse database");

    tracing::info!("Running migrations...");
    warehouse::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let ctx = Arc::new(WriterContext {
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

    start_writer_consumer(ctx, bus, config.clone());

    let app = Router::new().route("/api/health", get(health)).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Writer module listening on {}", addr);

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
        "module": "writer",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
