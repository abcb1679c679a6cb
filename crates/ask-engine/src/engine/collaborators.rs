//! External collaborator seams of the question pipeline

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::memory::ConversationEntry;
use crate::memory_db::Row;

/// Caller identity as resolved for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub query: String,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub rows: Vec<Row>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub tokens_used: u32,
}

/// Turns a question into a candidate query
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        history: &[ConversationEntry],
        identity: &Identity,
    ) -> anyhow::Result<GeneratedQuery>;
}

/// Runs an already validated query against the data store
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> anyhow::Result<ExecutionOutcome>;
}

/// Turns query results into prose
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn synthesize(&self, question: &str, query: &str, rows: &[Row]) -> anyhow::Result<SynthesizedAnswer>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_identity(&self) -> anyhow::Result<Identity>;
}

pub trait AccessPolicy: Send + Sync {
    fn is_allowed(&self, user_id: &str) -> bool;
}
