//! Application state shared by all handlers.

use std::sync::Arc;
use waypoint_storage::BlobStore;
use waypoint_worker::ProcessingEngine;

pub struct AppState {
    pub engine: ProcessingEngine,
    pub store: Arc<dyn BlobStore>,
}
