//! Processing engine and pipeline facade for the waypoint image pipeline.

mod engine;
mod resolve;

pub use engine::{EngineConfig, ProcessingEngine};
pub use resolve::resolve_derivative;
