//! HTTP control surface for one supervised terminal program.
//!
//! Thin adapter over [`Supervisor`]: no handler holds state of its own, and
//! every response body is JSON.

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use toybox_core::StatusSnapshot;
use toybox_core::Supervisor;
use toybox_core::SupervisorError;
use tracing::info;

/// Loopback address on `port`, used when no listen address is configured.
pub fn default_listen_addr(port: u16) -> String {
    format!("127.0.0.1:{port}")
}

/// Shared state for HTTP handlers.
pub struct AppState {
    supervisor: Arc<Supervisor>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub status: StatusSnapshot,
}

#[derive(Debug, Serialize)]
pub struct OutputResponse {
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct InputResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/output", get(output_handler))
        .route("/input", post(input_handler))
        .with_state(state)
}

/// Serves the control surface on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, adapter_id = %state.supervisor.adapter().id, "serving control surface");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: state.supervisor.status(),
    })
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.supervisor.status())
}

async fn output_handler(State(state): State<Arc<AppState>>) -> Json<OutputResponse> {
    Json(OutputResponse {
        output: state.supervisor.output(),
    })
}

async fn input_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InputRequest>,
) -> (StatusCode, Json<InputResponse>) {
    match state.supervisor.send(&request.text).await {
        Ok(()) => (
            StatusCode::OK,
            Json(InputResponse {
                ok: true,
                error: None,
            }),
        ),
        Err(err) => {
            let code = match err {
                SupervisorError::NotRunning { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::debug!(status = %code, "input rejected: {err}");
            (
                code,
                Json(InputResponse {
                    ok: false,
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}
