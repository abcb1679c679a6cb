//! Concrete collaborators for running the engine as a service

pub mod identity;
pub mod llm_backend;
pub mod sqlite_executor;

pub use identity::{DenyListPolicy, HeaderIdentity, StaticIdentity, USER_ID_HEADER, USER_NAME_HEADER};
pub use llm_backend::{strip_code_fences, LlmBackend, LlmBackendConfig};
pub use sqlite_executor::SqliteQueryExecutor;
