use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "chartforge_cache_hit_total",
            Unit::Count,
            "Chart requests answered from the artifact cache."
        );
        describe_counter!(
            "chartforge_cache_miss_total",
            Unit::Count,
            "Chart requests that needed a render."
        );
        describe_counter!(
            "chartforge_queue_rejected_total",
            Unit::Count,
            "Render admissions refused because the queue was full."
        );
        describe_counter!(
            "chartforge_queue_timeout_total",
            Unit::Count,
            "Render admissions that exceeded the queue timeout."
        );
        describe_gauge!(
            "chartforge_queue_depth",
            Unit::Count,
            "Renders currently running or waiting for a slot."
        );
        describe_histogram!(
            "chartforge_render_ms",
            Unit::Milliseconds,
            "Renderer process wall time in milliseconds."
        );
        describe_counter!(
            "chartforge_render_failures_total",
            Unit::Count,
            "Failed renders, labelled by failure kind."
        );
    });
}
