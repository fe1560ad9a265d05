//! Federated extraction worker service.
//!
//! Claims extraction jobs from the shared queue and runs them to a
//! terminal state:
//! - Plans time ranges across the archive and observation stores
//! - Extracts and merges the results into one output stream
//! - Chains the requested post-processing transforms
//! - Enforces per-request and per-user size quotas
//! - Delivers push or email notifications
//! Also runs the schedule beat loop and the data-ready event endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use federation::{FederatedExtractor, HttpArchive, SqlObservation};
use storage::catalog::Catalog;
use storage::queue::{JobKind, JobQueue, PeriodicTransport, RedisTransport};
use storage::records::Records;

use extraction_worker::beat::Beat;
use extraction_worker::config;
use extraction_worker::executor::{ExecutorContext, TaskExecutor};
use extraction_worker::notify::{EmailService, Notifier};
use extraction_worker::server::{self, ServerState};

/// Job kinds this worker registers handlers for.
const HANDLED_KINDS: [JobKind; 2] = [JobKind::DataExtraction, JobKind::RetentionCleanup];

#[derive(Parser, Debug)]
#[command(name = "extraction-worker")]
#[command(about = "Federated meteorological data extraction worker")]
struct Args {
    /// Redis URL for the job queue and transport registry
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Dataset catalog database
    #[arg(long, env = "CATALOG_DB", default_value = "/data/extract/catalog.db")]
    catalog_db: PathBuf,

    /// Request/schedule records database
    #[arg(long, env = "RECORDS_DB", default_value = "/data/extract/records.db")]
    records_db: PathBuf,

    /// Observation store database
    #[arg(long, env = "OBSERVATION_DB", default_value = "/data/extract/observations.db")]
    observation_db: PathBuf,

    /// Archive store query service URL
    #[arg(long, env = "ARCHIVE_URL", default_value = "http://localhost:8090")]
    archive_url: String,

    /// Directory for persisted outputs (one subdirectory per user)
    #[arg(long, default_value = "/data/outputs")]
    data_dir: PathBuf,

    /// Directory for temporary extraction artifacts
    #[arg(long, default_value = "/tmp/weather-extract")]
    tmp_dir: PathBuf,

    /// Observation-store retention horizon in days
    #[arg(long, env = "RETENTION_DAYS", default_value = "10")]
    retention_days: i64,

    /// Per-request output ceiling in bytes
    #[arg(long, env = "MAX_OUTPUT_SIZE", default_value = "1073741824")]
    max_output_size: u64,

    /// Per-user cumulative disk quota in bytes
    #[arg(long, env = "USER_QUOTA", default_value = "5368709120")]
    user_quota: u64,

    /// Validity intervals (hours) of the multi-model products
    #[arg(long, value_delimiter = ',', default_value = "24,48,72")]
    multimodel_validity_hours: Vec<u32>,

    /// Days after which terminal requests are cleaned up
    #[arg(long, default_value = "30")]
    request_retention_days: i64,

    /// Owner-id to email-address directory (JSON)
    #[arg(long, env = "MAIL_DIRECTORY", default_value = "config/mail.json")]
    mail_directory: PathBuf,

    /// SMTP relay host; unset disables email notifications
    #[arg(long, env = "SMTP_HOST")]
    smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value = "587")]
    smtp_port: u16,

    #[arg(long, env = "SMTP_FROM", default_value = "noreply@weather-extract.local")]
    smtp_from: String,

    #[arg(long, env = "SMTP_USER")]
    smtp_user: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD")]
    smtp_password: Option<String>,

    /// Public base URL for download links in notifications
    #[arg(long, env = "DOWNLOAD_BASE_URL")]
    download_base_url: Option<String>,

    /// Consumer name within the queue's consumer group
    #[arg(long, env = "CONSUMER_NAME", default_value = "worker-1")]
    consumer_name: String,

    /// Seconds between beat-loop passes over the schedule registry
    #[arg(long, default_value = "30")]
    beat_interval_secs: u64,

    /// Port for the status/data-ready HTTP server
    #[arg(long, env = "STATUS_PORT", default_value = "8082")]
    status_port: u16,

    /// Disable the status HTTP server
    #[arg(long)]
    no_status_server: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting extraction worker");

    // Create directories
    tokio::fs::create_dir_all(&args.data_dir).await?;
    tokio::fs::create_dir_all(&args.tmp_dir).await?;

    let federation_config = config::federation_config(
        args.retention_days,
        args.max_output_size,
        args.user_quota,
        args.data_dir.clone(),
        args.tmp_dir.clone(),
        args.multimodel_validity_hours.clone(),
        args.request_retention_days,
    );
    let tools = config::tools_config();

    // Storage and backends
    let catalog = Catalog::open(&args.catalog_db)
        .await
        .context("Failed to open catalog")?;
    let records = Arc::new(
        Records::open(&args.records_db)
            .await
            .context("Failed to open records")?,
    );
    let observation = Arc::new(
        SqlObservation::open(&args.observation_db)
            .await
            .context("Failed to open observation store")?,
    );
    let archive = Arc::new(HttpArchive::new(args.archive_url.clone()));
    let extractor = FederatedExtractor::new(archive, observation);

    // Queue plumbing
    let transport: Arc<dyn PeriodicTransport> = Arc::new(
        RedisTransport::connect(&args.redis_url)
            .await
            .context("Failed to connect transport registry")?,
    );
    let mut claim_queue = JobQueue::connect(&args.redis_url, &HANDLED_KINDS)
        .await
        .context("Failed to connect job queue")?;
    let beat_queue = Arc::new(Mutex::new(
        JobQueue::connect(&args.redis_url, &HANDLED_KINDS).await?,
    ));
    let server_queue = Arc::new(Mutex::new(
        JobQueue::connect(&args.redis_url, &HANDLED_KINDS).await?,
    ));
    let push_queue = JobQueue::connect(&args.redis_url, &HANDLED_KINDS).await?;

    // Notifier
    let email = match &args.smtp_host {
        Some(host) => EmailService::from_config(&config::SmtpConfig {
            host: host.clone(),
            port: args.smtp_port,
            from: args.smtp_from.clone(),
            user: args.smtp_user.clone(),
            password: args.smtp_password.clone(),
        }),
        None => {
            info!("SMTP not configured, email notifications disabled");
            None
        }
    };
    let mail_directory = config::load_mail_directory(&args.mail_directory)?;
    let notifier = Notifier::new(
        email,
        Some(push_queue),
        mail_directory,
        args.download_base_url.clone(),
        config::EmailRetryConfig::default(),
    );

    // Executor context shared by every job
    let records_for_ctx = Records::open(&args.records_db).await?;
    let ctx = Arc::new(ExecutorContext {
        config: federation_config,
        tools,
        catalog,
        records: records_for_ctx,
        extractor,
        transport: transport.clone(),
        notifier,
    });
    let executor = TaskExecutor::new(ctx);

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx_clone.send(()).ok();
    });

    // Status server with the data-ready intake
    if !args.no_status_server {
        let server_state = Arc::new(ServerState {
            records: records.clone(),
            transport: transport.clone(),
            queue: server_queue,
        });
        let status_port = args.status_port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(server_state, status_port).await {
                error!(error = %e, "Status server failed");
            }
        });
    }

    // Beat loop for periodic/crontab schedules and retention cleanup
    let beat = Beat::new(transport.clone(), records.clone(), beat_queue);
    let beat_interval = args.beat_interval_secs;
    let beat_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = beat.run_forever(beat_interval, beat_shutdown).await {
            error!(error = %e, "Beat loop failed");
        }
    });

    // Claim loop
    info!(consumer = %args.consumer_name, "Worker ready, claiming jobs");
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down worker");
                break;
            }
            claimed = claim_queue.claim_next(&args.consumer_name) => {
                match claimed {
                    Ok(Some((entry_id, job))) => {
                        if let Err(e) = executor.execute(&entry_id, job).await {
                            error!(entry = %entry_id, error = %e, "Job execution failed");
                        }
                        if let Err(e) = claim_queue.ack(&entry_id).await {
                            error!(entry = %entry_id, error = %e, "Failed to ack job");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "Queue read failed");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    Ok(())
}
