use axum::{routing::get, Json, Router};
use event_bus::retry::RetryConfig;
use event_bus::{EventBus, InMemoryBus, NatsBus};
use extractor_rs::{start_extractor_consumer, ExtractorContext};
use llm_gateway::{GeminiClient, LlmExtractor, OpenRouterClient};
use object_store::S3Store;
use observer::{LangfuseObserver, NoopObserver, Observer};
use pipeline_config::{BusKind, PipelineConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

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
    if let Err(e) = config.require_llm_keys() {
        eprintln!("configuration error: {}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8083".to_string())
        .parse()
        .expect("PORT must be a valid u16");

    let store = Arc::new(S3Store::connect(config.s3_endpoint.as_deref()).await);

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

    // Process-global observer with a background flusher.
    let observer: Arc<dyn Observer> = if config.observability.enabled {
        let langfuse = LangfuseObserver::new(
            config.observability.url.clone(),
            config.observability.public_key.clone().unwrap_or_default(),
            config.observability.secret_key.clone().unwrap_or_default(),
        );
        LangfuseObserver::spawn_flusher(langfuse.clone(), Duration::from_secs(5));
        langfuse
    } else {
        tracing::info!("Observability disabled; using noop observer");
        Arc::new(NoopObserver::new())
    };

    let primary: Arc<dyn LlmExtractor> = Arc::new(
        GeminiClient::new(
            config.llm.primary_model.clone(),
            config.llm.gemini_api_key.clone().unwrap_or_default(),
            config.llm.extract_timeout,
        )
        .expect("Failed to build primary LLM client"),
    );
    let fallback: Arc<dyn LlmExtractor> = Arc::new(
        OpenRouterClient::new(
            config.llm.fallback_model.clone(),
            config.llm.openrouter_api_key.clone().unwrap_or_default(),
            config.llm.extract_timeout,
        )
        .expect("Failed to build fallback LLM client"),
    );

    let ctx = Arc::new(ExtractorContext {
        store,
        bus: bus.clone(),
        observer: observer.clone(),
        primary,
        fallback,
        failed_bucket: config.buckets.failed.clone(),
        extracted_topic: config.topics.extracted.clone(),
        attempt_timeout: config.llm.extract_timeout,
        max_attempts: config.llm.max_attempts,
        backoff: RetryConfig::new(
            config.llm.max_attempts,
            config.llm.backoff_base_ms,
            config.llm.backoff_cap_ms,
        ),
    });

    start_extractor_consumer(ctx, bus, config.clone());

    let app = Router::new().route("/api/health", get(health)).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Extractor module listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    // Drain the observer buffer on shutdown; a flush failure must not
    // delay exit.
    let shutdown_observer = observer.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_observer.flush().await;
        })
        .await
        .expect("Server failed to start");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "extractor",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
