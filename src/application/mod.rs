//! Application services coordinating domain logic and infrastructure.

pub mod background;
pub mod chart;
pub mod error;
pub(crate) mod lock;
pub mod repos;
pub mod stream;
