//! Chart generation service: authorises datapacks, caches charts by content
//! digest, and supervises an external renderer with streamed progress.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
