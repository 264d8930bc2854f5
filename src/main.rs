use axum::response::Html;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use medscan::app_state::AppState;
use medscan::config::AppConfig;
use medscan::services::{model, queue::JobQueue, storage::StorageClient, workflow::Workflow};
use medscan::{db, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing medscan server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register the metrics emitted by this process; the worker registers
    // and exports the analysis-side metrics itself.
    metrics::describe_counter!("upload_urls_issued_total", "Signed upload URLs issued");
    metrics::describe_counter!("scan_submissions_total", "Total scan submissions");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize object storage client
    tracing::info!("Initializing object storage client");
    let storage = StorageClient::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_region,
        &config.storage_access_key,
        &config.storage_secret_key,
        config.storage_public_base.as_deref(),
    )
    .expect("Failed to initialize storage client");

    // Initialize Redis job queue
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    // Initialize the configured inference backend
    let model = model::from_config(&config).expect("Failed to initialize model client");
    tracing::info!(backend = model.name(), "Initialized model client");

    let workflow = Workflow::new(
        db_pool,
        Arc::new(storage),
        Arc::new(queue),
        model,
        config.upload_url_ttl_secs,
        Duration::from_secs(config.model_timeout_secs),
    );
    let state = AppState::new(workflow);

    // Build API routes
    let app = Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../static/index.html")) }))
        // API endpoints
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/generate-upload-url",
            post(routes::scans::generate_upload_url),
        )
        .route("/api/submit-scan", post(routes::scans::submit_scan))
        .route("/api/result/{submission_id}", get(routes::scans::get_result))
        .route("/api/submissions", get(routes::scans::list_submissions))
        .route("/api/stats", get(routes::scans::get_stats))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB; images bypass the API

    tracing::info!("Starting medscan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
