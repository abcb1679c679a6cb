// src/query_cache/mod.rs

//! Tiered result cache: exact fingerprint, lexical near-match and generated-query reuse

pub mod cache_config;
pub mod classifier;
pub mod hasher;
pub mod session_cache;
pub mod similarity;
pub mod tier_resolver;

// Re-exports
pub use cache_config::{window_start, CacheTierConfig, QueryResultPolicy};
pub use classifier::ResultClassifier;
pub use hasher::QueryHasher;
pub use session_cache::SessionCache;
pub use similarity::SimilarityScorer;
pub use tier_resolver::{CacheHit, CacheTierResolver};
