//! State shared by every HTTP handler

use std::sync::Arc;

use crate::backends::SqliteQueryExecutor;
use crate::config::Config;
use crate::engine::QueryOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub config: Arc<Config>,
    /// Data database probed by the status endpoint, when one is configured
    pub data_source: Option<Arc<SqliteQueryExecutor>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<QueryOrchestrator>, config: Arc<Config>) -> Self {
        Self { orchestrator, config, data_source: None }
    }

    pub fn with_data_source(mut self, executor: Arc<SqliteQueryExecutor>) -> Self {
        self.data_source = Some(executor);
        self
    }
}
