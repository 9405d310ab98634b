use std::sync::Arc;

use dataset::{DatasetStore, Storage};

use crate::config::AppConfig;
use crate::orchestrator_job::Orchestrator;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    pub store: DatasetStore,
    pub storage: Arc<dyn Storage>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Arc<dyn Storage>, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            store: orchestrator.store().clone(),
            storage,
            orchestrator,
        }
    }

    pub fn session(&self) -> &str {
        &self.config.session
    }
}
