//! Chart generation and cached-artifact endpoints.

use std::{io::ErrorKind, path::PathBuf};

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::application::{
    chart::{ChartError, spawn_chart_job, spawn_chart_request},
    error::HttpError,
    stream::ProgressStream,
};
use crate::domain::{CacheKey, CallerIdentity, ChartRequest, ProgressEvent};

use super::{HttpState, caller_identity};

const SVG_CONTENT_TYPE: &str = "image/svg+xml";
const SETTINGS_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Debug, Serialize)]
pub(super) struct ChartResponse {
    chartpath: String,
    hash: String,
}

pub(super) async fn create_chart(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<ChartRequest>,
) -> Result<Response, Response> {
    let identity = caller_identity(&headers).map_err(IntoResponse::into_response)?;
    let artifact = spawn_chart_request(state.service.clone(), request, identity)
        .await
        .map_err(ChartError::internal)
        .and_then(|result| result)
        .map_err(IntoResponse::into_response)?;

    Ok(Json(ChartResponse {
        chartpath: artifact.url_path,
        hash: artifact.cache_key.to_string(),
    })
    .into_response())
}

pub(super) async fn stream_chart(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<ChartRequest>,
) -> Result<ProgressStream, HttpError> {
    let identity = caller_identity(&headers)?;
    let events = spawn_chart_job(state.service.clone(), request, identity);
    Ok(ProgressStream::new(events))
}

pub(super) async fn chart_socket(
    State(state): State<HttpState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, HttpError> {
    let identity = caller_identity(&headers)?;
    Ok(upgrade.on_upgrade(move |socket| run_chart_socket(socket, state, identity)))
}

/// One request per socket: read a `ChartRequest` text frame, stream progress
/// frames until the terminal one, then close.
async fn run_chart_socket(
    mut socket: WebSocket,
    state: HttpState,
    identity: Option<CallerIdentity>,
) {
    const SOURCE: &str = "chartforge::infra::http::charts";

    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ChartRequest>(text.as_str()) {
                    Ok(request) => break request,
                    Err(err) => {
                        let event = ProgressEvent::Error {
                            message: format!("Invalid chart request: {err}"),
                            code: 422,
                        };
                        send_event(&mut socket, &event).await;
                        let _ = socket.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                debug!(
                    target = SOURCE,
                    op = "charts::socket",
                    result = "receive_error",
                    error = %err,
                    "Chart socket closed before a request arrived"
                );
                return;
            }
        }
    };

    let mut events = spawn_chart_job(state.service.clone(), request, identity);
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if !send_event(&mut socket, &event).await {
            // The render keeps running; only delivery stops.
            return;
        }
        if terminal {
            break;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_event(socket: &mut WebSocket, event: &ProgressEvent) -> bool {
    let payload = match serde_json::to_string(&event.to_message()) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(
                target = "chartforge::infra::http::charts",
                op = "charts::socket",
                result = "encode_error",
                error = %err,
                "Failed to encode progress event"
            );
            return true;
        }
    };
    socket.send(Message::Text(payload.into())).await.is_ok()
}

pub(super) async fn serve_chart(
    State(state): State<HttpState>,
    Path(hash): Path<String>,
) -> Response {
    let Some(key) = CacheKey::parse(&hash) else {
        return not_found("infra::http::charts::serve_chart");
    };
    let path = state.service.cache().chart_path(&key);
    serve_file("infra::http::charts::serve_chart", path, SVG_CONTENT_TYPE).await
}

pub(super) async fn serve_settings(
    State(state): State<HttpState>,
    Path(hash): Path<String>,
) -> Response {
    let Some(key) = CacheKey::parse(&hash) else {
        return not_found("infra::http::charts::serve_settings");
    };
    let path = state.service.cache().settings_path(&key);
    serve_file(
        "infra::http::charts::serve_settings",
        path,
        SETTINGS_CONTENT_TYPE,
    )
    .await
}

async fn serve_file(source: &'static str, path: PathBuf, content_type: &'static str) -> Response {
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut response = (StatusCode::OK, bytes).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            response
        }
        Err(err) if err.kind() == ErrorKind::NotFound => not_found(source),
        Err(err) => {
            error!(
                target = "chartforge::infra::http::charts",
                source = source,
                path = %path.display(),
                error = %err,
                "failed to read cached chart file"
            );
            HttpError::from_error(
                source,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read chart",
                &err,
            )
            .into_response()
        }
    }
}

fn not_found(source: &'static str) -> Response {
    HttpError::new(
        source,
        StatusCode::NOT_FOUND,
        "Chart not found",
        "The requested chart is not cached",
    )
    .into_response()
}
