mod charts;
mod middleware;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    middleware as axum_middleware,
    routing::{get, post},
};
use uuid::Uuid;

use crate::application::{
    chart::{ChartService, SchedulerSnapshot},
    error::HttpError,
};
use crate::domain::CallerIdentity;

use self::middleware::{log_responses, set_request_context};

/// Header carrying the caller's user uuid, set by the upstream auth layer.
pub const CALLER_HEADER: &str = "x-chartforge-user";

#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<ChartService>,
}

pub fn build_router(state: HttpState) -> Router {
    let prefix = state.service.cache().url_prefix().to_string();

    Router::new()
        .route("/api/charts", post(charts::create_chart))
        .route("/api/charts/stream", post(charts::stream_chart))
        .route("/api/charts/ws", get(charts::chart_socket))
        .route(
            &format!("{prefix}/{{hash}}/chart.svg"),
            get(charts::serve_chart),
        )
        .route(
            &format!("{prefix}/{{hash}}/settings.tsc"),
            get(charts::serve_settings),
        )
        .route("/health", get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health(
    axum::extract::State(state): axum::extract::State<HttpState>,
) -> Json<SchedulerSnapshot> {
    Json(state.service.scheduler_snapshot())
}

/// Identity asserted by the caller header; absent means anonymous.
fn caller_identity(headers: &HeaderMap) -> Result<Option<CallerIdentity>, HttpError> {
    const SOURCE: &str = "infra::http::caller_identity";

    let Some(value) = headers.get(CALLER_HEADER) else {
        return Ok(None);
    };
    let raw = value.to_str().map_err(|err| {
        HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid caller header", &err)
    })?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let uuid = Uuid::parse_str(raw.trim()).map_err(|err| {
        HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid caller header", &err)
    })?;
    Ok(Some(CallerIdentity::new(uuid)))
}
