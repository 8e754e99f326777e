use crate::data_model::ExecutionRequest;
use crate::executor::Executor;
use crate::utils::prometheus_metrics::gather_metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Reports the broker link state for `/health`.
pub type LinkProbe = Arc<dyn Fn() -> BoxFuture<'static, String> + Send + Sync>;

// The application state, shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<dyn Executor>,
    pub link_probe: LinkProbe,
}

/// JSON reply to `POST /execute`. `error` is null on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteReply {
    pub output: String,
    pub error: Option<String>,
}

pub async fn execute_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ExecutionRequest>,
) -> impl IntoResponse {
    let execution_id = Uuid::new_v4();
    let span = info_span!("execute", %execution_id, job = %request.job_name);

    let response = app_state.executor.execute(&request).instrument(span).await;

    let reply = ExecuteReply {
        output: String::from_utf8_lossy(&response.output).into_owned(),
        error: response.error.as_ref().map(|e| e.to_string()),
    };
    let status = if reply.error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(reply))
}

pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    // Always 200: a broker that was down at startup is recovered on demand.
    let link = (app_state.link_probe)().await;
    (StatusCode::OK, format!("OK (broker link {})", link))
}

pub async fn metrics_handler() -> (StatusCode, String) {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/execute", post(execute_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app_state)
}

// The main function to run the server
pub async fn run_server(app_state: Arc<AppState>, listen_addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(app_state)).await
}
