//! Chart generation pipeline.

pub mod cache_index;
pub mod channel;
pub mod error;
pub mod finalizer;
pub mod renderer;
pub mod resolver;
pub mod scheduler;
pub mod service;

pub use cache_index::{CacheIndex, CacheLookup};
pub use channel::{ProgressChannel, ProgressSink, spawn_chart_job, spawn_chart_request};
pub use error::ChartError;
pub use finalizer::{ArtifactFinalizer, FinalizeError};
pub use renderer::{ChartRenderer, RenderJob, RenderOutcome, RendererError, RendererSupervisor};
pub use resolver::{CallerContext, RequestResolver, ResolveError, ResolvedRequest};
pub use scheduler::{AdmissionError, AdmissionScheduler, Priority, SchedulerConfig, SchedulerSnapshot};
pub use service::{ChartCollaborators, ChartService};
