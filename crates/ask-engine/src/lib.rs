// crates/ask-engine/src/lib.rs

pub mod backends;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod memory_db;
pub mod metrics;
pub mod query_cache;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;
#[cfg(feature = "cli")]
pub mod shared_state;

// Public API exports
pub use config::Config;
pub use engine::{
    AskRequest, AskResponse, CacheStores, Collaborators, Identity, OrchestratorConfig, QueryOrchestrator,
};
pub use error::{AskError, AskResult, ErrorKind};
pub use memory::{ConversationEntry, ConversationStore};
pub use memory_db::{QueryDatabase, QueryRecord, RecordStore};
pub use query_cache::{CacheHit, CacheTierConfig, CacheTierResolver, QueryResultPolicy};

#[cfg(feature = "cli")]
pub use server::{build_router, run_server};
