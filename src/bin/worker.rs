use medscan::{
    config::AppConfig,
    db,
    services::{model, queue::JobQueue, storage::StorageClient, workflow::Workflow},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const QUEUE_DEPTH_SAMPLE_EVERY: u64 = 10;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting scan analysis worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Export analysis metrics from this process; the server only emits the
    // submit-side counters on its own /metrics route.
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");

    metrics::describe_counter!(
        "analysis_completed_total",
        "Analyses that produced a result"
    );
    metrics::describe_counter!("analysis_failed_total", "Analyses that ended in failure");
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Time spent in the model call per submission"
    );
    metrics::describe_gauge!(
        "analysis_queue_depth",
        "Current number of pending analysis jobs"
    );

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = StorageClient::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_region,
        &config.storage_access_key,
        &config.storage_secret_key,
        config.storage_public_base.as_deref(),
    )
    .expect("Failed to initialize storage client");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

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

    tracing::info!("Worker ready, starting job processing loop");

    let mut iterations: u64 = 0;

    // Main processing loop
    loop {
        iterations += 1;
        if iterations % QUEUE_DEPTH_SAMPLE_EVERY == 0 {
            if let Ok(depth) = workflow.queue.queue_depth().await {
                metrics::gauge!("analysis_queue_depth").set(depth as f64);
            }
        }

        match process_next_job(&workflow).await {
            Ok(true) => {
                // Job processed, check for the next one immediately
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                // No job available, sleep before next poll
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
///
/// Model failures are handled inside `run_analysis` and terminate the
/// submission; errors escaping here are database or queue failures, in which
/// case the job stays on the processing list for operator inspection.
async fn process_next_job(workflow: &Workflow) -> Result<bool, Box<dyn std::error::Error>> {
    let job = match workflow.queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(submission_id = %job.submission_id, "Processing analysis job");

    workflow.run_analysis(job.submission_id).await?;

    workflow.queue.complete(&job).await?;

    Ok(true)
}
