use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::broker::Broker;
use crate::config::QueueNames;
use crate::dispatcher::DispatcherSnapshot;
use crate::job::JobDescriptor;
use crate::producer::submit;
use crate::registry::WorkerRegistry;

#[derive(Clone)]
pub struct DashboardState {
    pub snapshot: watch::Receiver<DispatcherSnapshot>,
    pub broker: Arc<dyn Broker>,
    pub queues: QueueNames,
    pub registry: Arc<WorkerRegistry>,
}

#[derive(Serialize)]
struct QueueDepthsResponse {
    incoming: usize,
    waiting: usize,
    workers: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    success: bool,
    process_id: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/queues", get(queues_handler))
        .route("/api/jobs", post(submit_job_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Status server failed");
    }
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let snapshot = state.snapshot.borrow().clone();
    Json(snapshot)
}

async fn queues_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let depths = async {
        let incoming = state.broker.len(&state.queues.incoming).await?;
        let waiting = state.broker.len(&state.queues.waiting).await?;
        let mut workers = BTreeMap::new();
        for worker in state.registry.iter() {
            let depth = state.broker.len(&worker.queue_name).await?;
            workers.insert(worker.queue_name.clone(), depth);
        }
        Ok::<_, crate::error::LaunchError>(QueueDepthsResponse {
            incoming,
            waiting,
            workers,
        })
    };

    match depths.await {
        Ok(depths) => (StatusCode::OK, Json(depths)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn submit_job_handler(
    State(state): State<DashboardState>,
    Json(job): Json<JobDescriptor>,
) -> impl IntoResponse {
    if job.command.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SubmitJobResponse {
                success: false,
                process_id: None,
                error: Some("Job command must not be empty".to_string()),
            }),
        );
    }

    match submit(state.broker.as_ref(), &state.queues, &job).await {
        Ok(()) => (
            StatusCode::OK,
            Json(SubmitJobResponse {
                success: true,
                process_id: Some(job.process_id),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SubmitJobResponse {
                success: false,
                process_id: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}
