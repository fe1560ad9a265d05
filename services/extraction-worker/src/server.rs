//! HTTP endpoints for worker monitoring and the data-ready event intake.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use extract_common::time::Reftime;
use scheduling::{evaluate_data_ready, DataReadyEvent};
use storage::queue::{JobQueue, PeriodicTransport};
use storage::records::{Records, RequestStats};

pub struct ServerState {
    pub records: Arc<Records>,
    pub transport: Arc<dyn PeriodicTransport>,
    pub queue: Arc<Mutex<JobQueue>>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    service: String,
    requests: RequestStats,
    registered_schedules: usize,
    queue_depth: u64,
}

/// External "dataset became ready" notification.
#[derive(Debug, Deserialize)]
struct DataReadyPayload {
    dataset: String,
    run: String,
    at: Option<DateTime<Utc>>,
    reftime: Reftime,
}

#[derive(Debug, Serialize)]
struct DataReadyResponse {
    fired: usize,
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status_handler))
        .route("/data-ready", post(data_ready_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(Extension(state))
}

/// GET /status - request counts and registered schedules
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    let requests = match state.records.request_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let registered_schedules = state
        .transport
        .list()
        .await
        .map(|entries| entries.len())
        .unwrap_or(0);

    let queue_depth = state.queue.lock().await.queue_depth().await.unwrap_or(0);

    Json(StatusResponse {
        service: "extraction-worker".to_string(),
        requests,
        registered_schedules,
        queue_depth,
    })
    .into_response()
}

/// POST /data-ready - evaluate an event against on-data-ready schedules
async fn data_ready_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Json(payload): Json<DataReadyPayload>,
) -> impl IntoResponse {
    let event = DataReadyEvent {
        dataset: payload.dataset,
        run: payload.run,
        at: payload.at.unwrap_or_else(Utc::now),
        reftime: payload.reftime,
    };

    let jobs = match evaluate_data_ready(&event, &state.records).await {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(error = %e, "Data-ready evaluation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let mut fired = 0;
    for job in jobs {
        match state.queue.lock().await.enqueue(&job).await {
            Ok(_) => fired += 1,
            Err(e) => error!(error = %e, "Failed to enqueue data-ready job"),
        }
    }

    info!(dataset = %event.dataset, run = %event.run, fired = fired, "Processed data-ready event");
    Json(DataReadyResponse { fired }).into_response()
}

/// GET /health - Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "extraction-worker"
    }))
}

/// Start the HTTP server.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting worker status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
