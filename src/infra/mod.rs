//! Infrastructure adapters and runtime bootstrap.

pub mod datapacks;
pub mod db;
pub mod error;
pub mod history;
pub mod http;
pub mod retention;
pub mod telemetry;
