//! Per-request progress stream.
//!
//! A [`ProgressChannel`] delivers any number of intermediate events followed
//! by exactly one terminal event, after which the receiving side ends.

use std::sync::Arc;

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::debug;

use crate::domain::{CallerIdentity, ChartArtifact, ChartRequest, ProgressEvent};

use super::{error::ChartError, service::ChartService};

/// Write side handed to pipeline stages for intermediate events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that drops everything, for callers that only want the result.
    pub fn discard() -> Self {
        Self::default()
    }

    /// Send an intermediate event. A gone receiver is not an error; the
    /// request keeps running.
    pub fn emit(&self, event: ProgressEvent) {
        if event.is_terminal() {
            debug!(
                target = "chartforge::application::chart::channel",
                op = "channel::emit",
                result = "ignored_terminal",
                "Terminal events are only sent by the channel owner"
            );
            return;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

pub struct ProgressChannel {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn open() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn sink(&self) -> ProgressSink {
        ProgressSink {
            tx: Some(self.tx.clone()),
        }
    }

    /// Send the terminal event for `result` and close the channel.
    pub fn finish(self, result: &Result<ChartArtifact, ChartError>) {
        let _ = self.tx.send(terminal_event(result));
    }
}

pub fn terminal_event(result: &Result<ChartArtifact, ChartError>) -> ProgressEvent {
    match result {
        Ok(artifact) => ProgressEvent::Complete {
            cache_key: artifact.cache_key.clone(),
            url_path: artifact.url_path.clone(),
        },
        Err(error) => ProgressEvent::Error {
            message: error.to_string(),
            code: error.code(),
        },
    }
}

/// Run a chart request in its own task and return its event stream.
///
/// Dropping the receiver does not stop the render.
pub fn spawn_chart_job(
    service: Arc<ChartService>,
    request: ChartRequest,
    identity: Option<CallerIdentity>,
) -> UnboundedReceiver<ProgressEvent> {
    let (channel, events) = ProgressChannel::open();
    let background = service.background().clone();
    background.track(async move {
        let result = service.generate(request, identity, &channel.sink()).await;
        channel.finish(&result);
    });
    events
}

/// Run a chart request in its own task without progress reporting.
///
/// Dropping the handle does not stop the render.
pub fn spawn_chart_request(
    service: Arc<ChartService>,
    request: ChartRequest,
    identity: Option<CallerIdentity>,
) -> JoinHandle<Result<ChartArtifact, ChartError>> {
    let background = service.background().clone();
    background.track(async move {
        service
            .generate(request, identity, &ProgressSink::discard())
            .await
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::application::chart::scheduler::AdmissionError;
    use crate::domain::{CacheKey, DatapackRef};

    #[tokio::test]
    async fn closes_after_exactly_one_terminal_event() {
        let (channel, mut events) = ProgressChannel::open();
        let sink = channel.sink();
        sink.emit(ProgressEvent::Initializing);
        sink.emit(ProgressEvent::Error {
            message: "smuggled".to_string(),
            code: 1,
        });
        drop(sink);
        channel.finish(&Err(ChartError::from(AdmissionError::Capacity {
            depth: 1,
            max_depth: 1,
        })));

        assert_eq!(events.recv().await, Some(ProgressEvent::Initializing));
        assert_eq!(
            events.recv().await,
            Some(ProgressEvent::Error {
                message: "Queue is too busy".to_string(),
                code: 503,
            })
        );
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn success_becomes_complete() {
        let key = CacheKey::for_request(&ChartRequest {
            settings_text: String::new(),
            datapack_refs: vec![DatapackRef::official("GTS", "gts.dpk")],
            use_cache: true,
            is_cross_plot: false,
        });
        let artifact = ChartArtifact {
            cache_key: key.clone(),
            url_path: format!("/public/charts/{key}/chart.svg"),
            filesystem_path: PathBuf::from("/tmp/chart.svg"),
        };

        let event = terminal_event(&Ok(artifact.clone()));
        assert_eq!(
            event,
            ProgressEvent::Complete {
                cache_key: key,
                url_path: artifact.url_path,
            }
        );
    }

    #[test]
    fn discarded_sink_accepts_events() {
        ProgressSink::discard().emit(ProgressEvent::GeneratingChart);
    }
}
