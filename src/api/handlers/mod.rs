pub mod ask;
pub mod schema;
pub mod store;

use std::sync::Arc;

use crate::services::{AskPipeline, GenerationBackend, SchemaService, StoreRegistry};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StoreRegistry>,
    pub schemas: Arc<SchemaService>,
    pub pipeline: Arc<AskPipeline>,
    pub backend: Arc<dyn GenerationBackend>,
}
