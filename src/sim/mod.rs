//! In-process stand-ins for the membership layer and the execution engine.
//!
//! Used by the `demo` and `run` commands and by the integration tests.

pub mod cluster;
pub mod engine;

pub use cluster::LocalCluster;
pub use engine::LocalEngine;
