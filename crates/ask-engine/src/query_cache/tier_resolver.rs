//! Tier probing over the session cache and the durable record store

use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use crate::memory_db::{CacheTier, QueryRecord, RecordStore};
use crate::query_cache::{window_start, CacheTierConfig, QueryHasher, SessionCache, SimilarityScorer};
use crate::utils::TextUtils;

/// Result of a successful tier probe. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheHit {
    Exact { record: QueryRecord },
    Semantic { record: QueryRecord, similarity: f32 },
    QueryResult { record: QueryRecord },
}

impl CacheHit {
    pub fn tier(&self) -> CacheTier {
        match self {
            CacheHit::Exact { .. } => CacheTier::L1,
            CacheHit::Semantic { .. } => CacheTier::L2,
            CacheHit::QueryResult { .. } => CacheTier::L3,
        }
    }

    pub fn record(&self) -> &QueryRecord {
        match self {
            CacheHit::Exact { record }
            | CacheHit::Semantic { record, .. }
            | CacheHit::QueryResult { record } => record,
        }
    }

    pub fn into_record(self) -> QueryRecord {
        match self {
            CacheHit::Exact { record }
            | CacheHit::Semantic { record, .. }
            | CacheHit::QueryResult { record } => record,
        }
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            CacheHit::Semantic { similarity, .. } => Some(*similarity),
            _ => None,
        }
    }
}

/// Probes L1 then L2 before generation, and L3 once a query has been generated
pub struct CacheTierResolver {
    records: Arc<dyn RecordStore>,
    session_cache: Arc<SessionCache>,
    config: CacheTierConfig,
}

impl CacheTierResolver {
    pub fn new(records: Arc<dyn RecordStore>, session_cache: Arc<SessionCache>, config: CacheTierConfig) -> Self {
        Self { records, session_cache, config }
    }

    pub fn config(&self) -> &CacheTierConfig {
        &self.config
    }

    /// First pre-generation hit, or `None` when both L1 and L2 miss
    pub fn resolve(&self, question: &str, session_id: &str, now: DateTime<Utc>) -> Option<CacheHit> {
        let question_hash = QueryHasher::hash(question);
        if let Some(record) = self.probe_exact(&question_hash, session_id, now) {
            return Some(CacheHit::Exact { record });
        }
        self.probe_semantic(question, now)
    }

    /// Newest of the session cache and the store; the store alone covers other sessions
    fn probe_exact(&self, question_hash: &str, session_id: &str, now: DateTime<Utc>) -> Option<QueryRecord> {
        let since = window_start(now, self.config.exact_window());

        let cached = self.session_cache.find_exact(session_id, question_hash, since);
        let stored = match self.records.latest_by_hash(question_hash, since) {
            Ok(found) => found,
            Err(e) => {
                warn!("L1 probe failed, treating as miss: {}", e);
                None
            }
        };

        match (cached, stored) {
            (Some(cached), Some(stored)) if stored.created_at > cached.created_at => Some(stored),
            (Some(cached), _) => {
                debug!("L1 hit in session cache for session '{}'", session_id);
                Some(cached)
            }
            (None, stored) => stored,
        }
    }

    fn probe_semantic(&self, question: &str, now: DateTime<Utc>) -> Option<CacheHit> {
        let since = window_start(now, self.config.semantic_window());
        let candidates = match self.records.recent(since, self.config.semantic_candidates) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("L2 probe failed, treating as miss: {}", e);
                return None;
            }
        };

        let tokens = TextUtils::tokenize(question);
        let mut best: Option<(f32, QueryRecord)> = None;
        // Candidates arrive newest first; only a strictly better score displaces the current best
        for record in candidates {
            let score = SimilarityScorer::score(&tokens, &TextUtils::tokenize(&record.question_text));
            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, record));
            }
        }

        match best {
            Some((similarity, record)) if similarity > self.config.semantic_threshold => {
                debug!("L2 hit with similarity {:.3}", similarity);
                Some(CacheHit::Semantic { record, similarity })
            }
            _ => None,
        }
    }

    /// L3: a record with a byte-identical generated query inside the L3 window
    pub fn probe_query_result(&self, query: &str, now: DateTime<Utc>) -> Option<CacheHit> {
        let since = window_start(now, self.config.query_result_window());
        match self.records.latest_by_query(query, since) {
            Ok(found) => found.map(|record| CacheHit::QueryResult { record }),
            Err(e) => {
                warn!("L3 probe failed, treating as miss: {}", e);
                None
            }
        }
    }
}
