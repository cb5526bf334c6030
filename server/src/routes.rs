use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    error::{AppError, AppJsonResult},
    pipeline::RunSummary,
    ServerState,
};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        Router::new()
            .route("/", get(|| async { "Triage server" }))
            .route("/health", get(handler_health))
            .route("/cron/process-emails", post(handler_process_emails))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
            .fallback(handler_404)
    }
}

async fn handler_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Manual trigger for a processing cycle, for the external cron fallback
/// and for operators. Guarded by a shared secret.
async fn handler_process_emails(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> AppJsonResult<RunSummary> {
    require_cron_secret(&headers)?;

    let summary = state.pipeline.run_cycle().await?;
    Ok(Json(summary))
}

fn require_cron_secret(headers: &HeaderMap) -> Result<(), AppError> {
    let secret = std::env::var("CRON_SECRET")
        .map_err(|_| AppError::Unauthorized("CRON_SECRET is not configured".to_string()))?;

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret);

    if !authorized {
        return Err(AppError::Unauthorized("Invalid cron secret".to_string()));
    }

    Ok(())
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
