//! Question pipeline: collaborators, validation, orchestration and write-behind persistence

pub mod collaborators;
pub mod orchestrator;
pub mod query_guard;
pub mod write_behind;

pub use collaborators::{
    AccessPolicy, AnswerSynthesizer, ExecutionOutcome, GeneratedQuery, Identity, IdentityProvider,
    QueryExecutor, QueryGenerator, SynthesizedAnswer,
};
pub use orchestrator::{
    fallback_answer, AskRequest, AskResponse, Collaborators, OrchestratorConfig, QueryOrchestrator, Stage,
};
pub use query_guard::{GuardViolation, QueryGuard};
pub use write_behind::{CacheStores, PersistJob, WriteBehind};
