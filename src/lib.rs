pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod execution;
pub mod job;
pub mod repository;
pub mod shutdown;
pub mod sim;

pub use coordinator::JobCoordinationService;
pub use error::{CoordError, ExecutionError, Result};
