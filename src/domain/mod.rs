//! Domain model shared by the application and infrastructure layers.

pub mod chart;
pub mod progress;

pub use chart::{CacheKey, CallerIdentity, ChartArtifact, ChartRequest, DatapackRef, DatapackSource};
pub use progress::{DatapackStep, ProgressEvent, ProgressMessage};
