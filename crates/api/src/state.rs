use std::sync::Arc;

use prebake_core::store::JobStore;
use prebake_pipeline::orchestrator::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// In-memory job registry shared with every pipeline task.
    pub store: Arc<dyn JobStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Pipeline driver; handlers spawn `run` onto the runtime.
    pub orchestrator: Arc<Orchestrator>,
}
