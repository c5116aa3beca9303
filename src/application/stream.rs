//! Helpers for turning a chart job's progress into an SSE response.

use std::convert::Infallible;

use async_stream::stream;
use axum::response::{
    IntoResponse, Response,
    sse::{Event, KeepAlive, Sse},
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::domain::ProgressEvent;

/// SSE event name used for every progress message.
pub const PROGRESS_EVENT_NAME: &str = "progress";

/// Wraps a progress receiver and ends the stream after the terminal event.
pub struct ProgressStream {
    events: UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    pub fn new(events: UnboundedReceiver<ProgressEvent>) -> Self {
        Self { events }
    }
}

impl IntoResponse for ProgressStream {
    fn into_response(self) -> Response {
        let mut events = self.events;
        let stream = stream! {
            while let Some(event) = events.recv().await {
                let terminal = event.is_terminal();
                match Event::default()
                    .event(PROGRESS_EVENT_NAME)
                    .json_data(event.to_message())
                {
                    Ok(sse) => {
                        yield Ok::<Event, Infallible>(sse);
                    }
                    Err(err) => warn!(
                        target = "chartforge::application::stream",
                        op = "stream::progress",
                        result = "encode_error",
                        error = %err,
                        "Failed to encode progress event"
                    ),
                }
                if terminal {
                    break;
                }
            }
        };
        Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response()
    }
}
