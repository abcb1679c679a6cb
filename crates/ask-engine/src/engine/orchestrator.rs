use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::collaborators::{
    AccessPolicy, AnswerSynthesizer, Identity, IdentityProvider, QueryExecutor, QueryGenerator,
};
use crate::engine::query_guard::QueryGuard;
use crate::engine::write_behind::{CacheStores, PersistJob, WriteBehind};
use crate::error::{AskError, AskResult};
use crate::memory::{ConversationEntry, SessionLogConfig};
use crate::memory_db::{CacheTier, ComplexityClass, NewQueryRecord, QueryRecord, ResultPayload};
use crate::metrics;
use crate::query_cache::{
    window_start, CacheHit, CacheTierConfig, CacheTierResolver, QueryHasher, QueryResultPolicy,
    ResultClassifier,
};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cache: CacheTierConfig,
    pub history: SessionLogConfig,
    pub request_timeout: Duration,
    pub persist_queue_size: usize,
    pub read_only_verbs: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache: CacheTierConfig::default(),
            history: SessionLogConfig::default(),
            request_timeout: Duration::from_secs(60),
            persist_queue_size: 1024,
            read_only_verbs: vec!["select".to_string()],
        }
    }
}

/// External services the pipeline calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn QueryGenerator>,
    pub executor: Arc<dyn QueryExecutor>,
    pub synthesizer: Arc<dyn AnswerSynthesizer>,
    pub policy: Arc<dyn AccessPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: String,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { question: question.into(), session_id: session_id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub request_id: String,
    pub question: String,
    pub answer_text: String,
    pub generated_query: String,
    #[serde(rename = "resultPayload")]
    pub result: ResultPayload,
    pub complexity_class: ComplexityClass,
    pub tokens_consumed: u32,
    pub cached: bool,
    pub cache_tier: Option<CacheTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub synthesis_degraded: bool,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
}

/// Pipeline position of a request, reported in error logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    PermissionCheck,
    HistoryLoad,
    CacheProbe,
    Generate,
    Validate,
    QueryResultProbe,
    Execute,
    Synthesize,
    Respond,
    PersistAsync,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct StageTracker {
    request_id: String,
    stage: Stage,
}

impl StageTracker {
    fn new(request_id: &str) -> Self {
        Self { request_id: request_id.to_string(), stage: Stage::Start }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(request_id = %self.request_id, "{} -> {}", self.stage, stage);
        self.stage = stage;
    }
}

/// Rows, answer and cost once the query side of the pipeline is settled
struct Resolution {
    query: String,
    result: ResultPayload,
    answer_text: String,
    tokens: u32,
    cache_tier: Option<CacheTier>,
    synthesis_degraded: bool,
}

/// Top-level question pipeline: permission, history, cache tiers, generation,
/// execution, synthesis, then write-behind persistence.
pub struct QueryOrchestrator {
    collaborators: Collaborators,
    stores: CacheStores,
    resolver: CacheTierResolver,
    guard: QueryGuard,
    write_behind: WriteBehind,
    config: OrchestratorConfig,
}

impl QueryOrchestrator {
    /// Must be called from within a tokio runtime; the persistence worker is spawned here
    pub fn new(collaborators: Collaborators, stores: CacheStores, config: OrchestratorConfig) -> anyhow::Result<Self> {
        metrics::init_metrics()?;
        let guard = QueryGuard::new(config.read_only_verbs.as_slice())?;
        let resolver = CacheTierResolver::new(
            Arc::clone(&stores.records),
            Arc::clone(&stores.session_cache),
            config.cache.clone(),
        );
        let write_behind = WriteBehind::spawn(stores.clone(), config.persist_queue_size);
        info!("Query orchestrator initialized");
        Ok(Self { collaborators, stores, resolver, guard, write_behind, config })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn stores(&self) -> &CacheStores {
        &self.stores
    }

    /// Persistence jobs finished so far
    pub fn persisted_jobs(&self) -> u64 {
        self.write_behind.processed_jobs()
    }

    pub async fn ask(&self, identity: &dyn IdentityProvider, request: AskRequest) -> AskResult<AskResponse> {
        self.ask_with_timeout(identity, request, self.config.request_timeout).await
    }

    pub async fn ask_with_timeout(
        &self,
        identity: &dyn IdentityProvider,
        request: AskRequest,
        timeout: Duration,
    ) -> AskResult<AskResponse> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut tracker = StageTracker::new(&request_id);
        info!(request_id = %request_id, session_id = %request.session_id, "Question received");

        let outcome = match tokio::time::timeout(timeout, self.run(identity, &request, &mut tracker, started)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AskError::Timeout(timeout)),
        };
        metrics::observe_request_duration(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(response) => {
                metrics::inc_request("ok");
                info!(
                    request_id = %request_id,
                    "Answered in {}ms (tier: {})",
                    response.response_time_ms,
                    response.cache_tier.map(|t| t.as_str()).unwrap_or("none")
                );
            }
            Err(e) => {
                metrics::inc_request(e.kind().outcome_label());
                match e {
                    AskError::Forbidden(_) => warn!(request_id = %request_id, "Request refused: {}", e),
                    _ => error!(request_id = %request_id, stage = %tracker.stage, "Request failed: {:#}", e),
                }
            }
        }
        outcome
    }

    async fn run(
        &self,
        identity: &dyn IdentityProvider,
        request: &AskRequest,
        tracker: &mut StageTracker,
        started: Instant,
    ) -> AskResult<AskResponse> {
        tracker.enter(Stage::PermissionCheck);
        let identity = identity
            .resolve_identity()
            .await
            .map_err(|e| AskError::Forbidden(format!("identity unavailable: {}", e)))?;
        if !self.collaborators.policy.is_allowed(&identity.user_id) {
            return Err(AskError::Forbidden(format!("user '{}' is not allowed", identity.user_id)));
        }

        tracker.enter(Stage::HistoryLoad);
        let history = self.load_history(&request.session_id);

        tracker.enter(Stage::CacheProbe);
        let question = request.question.as_str();
        let similarity;
        let resolution = match self.resolver.resolve(question, &request.session_id, Utc::now()) {
            Some(hit) => {
                metrics::inc_cache_hit(hit.tier().as_str());
                similarity = hit.similarity();
                let tier = hit.tier();
                let record = hit.into_record();
                Resolution {
                    query: record.generated_query,
                    result: record.result,
                    answer_text: record.answer_text,
                    tokens: 0,
                    cache_tier: Some(tier),
                    synthesis_degraded: false,
                }
            }
            None => {
                similarity = None;
                self.resolve_fresh(question, &history, &identity, tracker).await?
            }
        };

        tracker.enter(Stage::Respond);
        let now = Utc::now();
        let complexity = ResultClassifier::classify(&resolution.query, resolution.result.row_count);
        let response = AskResponse {
            request_id: tracker.request_id.clone(),
            question: question.to_string(),
            answer_text: resolution.answer_text,
            generated_query: resolution.query,
            result: resolution.result,
            complexity_class: complexity,
            tokens_consumed: resolution.tokens,
            cached: resolution.cache_tier.is_some(),
            cache_tier: resolution.cache_tier,
            similarity,
            synthesis_degraded: resolution.synthesis_degraded,
            timestamp: now,
            response_time_ms: started.elapsed().as_millis() as u64,
        };

        tracker.enter(Stage::PersistAsync);
        self.write_behind.enqueue(self.persist_job(&identity, &request.session_id, &response));

        tracker.enter(Stage::Done);
        Ok(response)
    }

    /// Generation onwards, after L1 and L2 have missed
    async fn resolve_fresh(
        &self,
        question: &str,
        history: &[ConversationEntry],
        identity: &Identity,
        tracker: &mut StageTracker,
    ) -> AskResult<Resolution> {
        tracker.enter(Stage::Generate);
        let generated = self
            .collaborators
            .generator
            .generate(question, history, identity)
            .await
            .map_err(|e| AskError::Generation(format!("{:#}", e)))?;

        tracker.enter(Stage::Validate);
        let query = self
            .guard
            .check(&generated.query)
            .map_err(|violation| AskError::Generation(violation.to_string()))?;

        tracker.enter(Stage::QueryResultProbe);
        let stored = self.resolver.probe_query_result(&query, Utc::now()).map(CacheHit::into_record);

        let (result, cache_tier) = match &stored {
            Some(record) => {
                metrics::inc_cache_hit(CacheTier::L3.as_str());
                (record.result.clone(), Some(CacheTier::L3))
            }
            None => {
                metrics::inc_cache_miss();
                tracker.enter(Stage::Execute);
                let outcome = self
                    .collaborators
                    .executor
                    .execute(&query)
                    .await
                    .map_err(|e| AskError::Execution(format!("{:#}", e)))?;
                (ResultPayload::new(outcome.rows, outcome.duration_ms), None)
            }
        };

        if let (Some(record), QueryResultPolicy::ReuseStoredAnswer) = (&stored, self.config.cache.query_result_policy) {
            return Ok(Resolution {
                query,
                result,
                answer_text: record.answer_text.clone(),
                tokens: generated.tokens_used,
                cache_tier,
                synthesis_degraded: false,
            });
        }

        tracker.enter(Stage::Synthesize);
        let (answer_text, synthesis_tokens, synthesis_degraded) =
            match self.collaborators.synthesizer.synthesize(question, &query, &result.rows).await {
                Ok(answer) => (answer.answer, answer.tokens_used, false),
                Err(e) => {
                    warn!(request_id = %tracker.request_id, "Answer synthesis failed, using template: {:#}", e);
                    (fallback_answer(result.row_count), 0, true)
                }
            };

        Ok(Resolution {
            query,
            result,
            answer_text,
            tokens: generated.tokens_used.saturating_add(synthesis_tokens),
            cache_tier,
            synthesis_degraded,
        })
    }

    /// In-memory history first; after a restart, rebuilt from the session's stored records
    fn load_history(&self, session_id: &str) -> Vec<ConversationEntry> {
        if session_id.is_empty() {
            return Vec::new();
        }
        let history = self.stores.conversations.get(session_id);
        if !history.is_empty() {
            return history;
        }

        let window = chrono::Duration::from_std(self.config.history.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        match self.stores.records.recent_for_session(
            session_id,
            window_start(Utc::now(), window),
            self.stores.conversations.max_entries(),
        ) {
            Ok(records) => records.into_iter().map(entry_from_record).collect(),
            Err(e) => {
                warn!("Failed to load stored history for session '{}': {}", session_id, e);
                Vec::new()
            }
        }
    }

    fn persist_job(&self, identity: &Identity, session_id: &str, response: &AskResponse) -> PersistJob {
        PersistJob {
            record: NewQueryRecord {
                session_id: session_id.to_string(),
                user_id: identity.user_id.clone(),
                question_text: response.question.clone(),
                question_hash: QueryHasher::hash(&response.question),
                generated_query: response.generated_query.clone(),
                result: response.result.clone(),
                answer_text: response.answer_text.clone(),
                complexity: response.complexity_class,
                tokens_consumed: response.tokens_consumed,
                cache_tier: response.cache_tier,
                created_at: response.timestamp,
            },
            entry: ConversationEntry {
                timestamp: response.timestamp,
                question_text: response.question.clone(),
                generated_query: response.generated_query.clone(),
                answer_text: response.answer_text.clone(),
                result: response.result.clone(),
            },
        }
    }
}

pub fn fallback_answer(row_count: usize) -> String {
    format!("Found {} result(s).", row_count)
}

fn entry_from_record(record: QueryRecord) -> ConversationEntry {
    ConversationEntry {
        timestamp: record.created_at,
        question_text: record.question_text,
        generated_query: record.generated_query,
        answer_text: record.answer_text,
        result: record.result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collaborators::{ExecutionOutcome, GeneratedQuery, SynthesizedAnswer};
    use crate::memory_db::{InMemoryRecordStore, RecordStore, Row};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedGenerator {
        query: String,
        calls: AtomicUsize,
        histories: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl QueryGenerator for FixedGenerator {
        async fn generate(&self, _: &str, history: &[ConversationEntry], _: &Identity) -> anyhow::Result<GeneratedQuery> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.histories.lock().unwrap().push(history.len());
            Ok(GeneratedQuery { query: self.query.clone(), tokens_used: 30 })
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(&self, _: &str) -> anyhow::Result<ExecutionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut row = Row::new();
            row.insert("total".into(), json!(12));
            Ok(ExecutionOutcome { rows: vec![row], duration_ms: 4 })
        }
    }

    struct EchoSynthesizer;

    #[async_trait]
    impl AnswerSynthesizer for EchoSynthesizer {
        async fn synthesize(&self, question: &str, _: &str, rows: &[Row]) -> anyhow::Result<SynthesizedAnswer> {
            Ok(SynthesizedAnswer { answer: format!("{} -> {} rows", question, rows.len()), tokens_used: 20 })
        }
    }

    struct Anyone;

    impl AccessPolicy for Anyone {
        fn is_allowed(&self, _: &str) -> bool {
            true
        }
    }

    struct Alice;

    #[async_trait]
    impl IdentityProvider for Alice {
        async fn resolve_identity(&self) -> anyhow::Result<Identity> {
            Ok(Identity { user_id: "alice".into(), display_name: "Alice".into() })
        }
    }

    struct Harness {
        orchestrator: QueryOrchestrator,
        generator: Arc<FixedGenerator>,
        executor: Arc<CountingExecutor>,
        records: Arc<InMemoryRecordStore>,
    }

    fn harness(query: &str, config: OrchestratorConfig) -> Harness {
        let generator = Arc::new(FixedGenerator {
            query: query.to_string(),
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        });
        let executor = Arc::new(CountingExecutor { calls: AtomicUsize::new(0) });
        let records = Arc::new(InMemoryRecordStore::new());
        let stores = CacheStores::new(records.clone(), &config.history);
        let orchestrator = QueryOrchestrator::new(
            Collaborators {
                generator: generator.clone(),
                executor: executor.clone(),
                synthesizer: Arc::new(EchoSynthesizer),
                policy: Arc::new(Anyone),
            },
            stores,
            config,
        )
        .unwrap();
        Harness { orchestrator, generator, executor, records }
    }

    async fn settle(orchestrator: &QueryOrchestrator, jobs: u64) {
        for _ in 0..200 {
            if orchestrator.persisted_jobs() >= jobs {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("persistence did not settle");
    }

    // ===== Fresh Resolution Tests =====

    #[tokio::test]
    async fn test_fresh_resolution_sums_tokens() {
        let h = harness("SELECT SUM(qty) FROM pallets", OrchestratorConfig::default());
        let response = h.orchestrator.ask(&Alice, AskRequest::new("How many pallets?", "s1")).await.unwrap();
        assert!(!response.cached);
        assert_eq!(response.cache_tier, None);
        assert_eq!(response.tokens_consumed, 50);
        assert_eq!(response.result.row_count, 1);
        assert_eq!(response.complexity_class, ComplexityClass::Simple);
        assert_eq!(response.answer_text, "How many pallets? -> 1 rows");
    }

    #[tokio::test]
    async fn test_persisted_record_carries_response_fields() {
        let h = harness("SELECT 1", OrchestratorConfig::default());
        let response = h.orchestrator.ask(&Alice, AskRequest::new("How many pallets?", "s1")).await.unwrap();
        settle(&h.orchestrator, 1).await;
        let stored = h
            .records
            .latest_by_hash(&QueryHasher::hash("How many pallets?"), response.timestamp - chrono::Duration::seconds(1))
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, "alice");
        assert_eq!(stored.answer_text, response.answer_text);
        assert_eq!(stored.tokens_consumed, 50);
    }

    // ===== L3 Tests =====

    #[tokio::test]
    async fn test_identical_query_reuses_rows_and_resynthesizes() {
        let h = harness("SELECT SUM(qty) FROM pallets", OrchestratorConfig::default());
        h.orchestrator.ask(&Alice, AskRequest::new("How many pallets?", "s1")).await.unwrap();
        settle(&h.orchestrator, 1).await;

        let response = h
            .orchestrator
            .ask(&Alice, AskRequest::new("What is the pallet quantity total", "s2"))
            .await
            .unwrap();
        assert_eq!(response.cache_tier, Some(CacheTier::L3));
        assert!(response.cached);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(response.answer_text, "What is the pallet quantity total -> 1 rows");
        assert_eq!(response.tokens_consumed, 50);
    }

    #[tokio::test]
    async fn test_reuse_policy_returns_stored_answer() {
        let mut config = OrchestratorConfig::default();
        config.cache.query_result_policy = QueryResultPolicy::ReuseStoredAnswer;
        let h = harness("SELECT SUM(qty) FROM pallets", config);
        let first = h.orchestrator.ask(&Alice, AskRequest::new("How many pallets?", "s1")).await.unwrap();
        settle(&h.orchestrator, 1).await;

        let second = h
            .orchestrator
            .ask(&Alice, AskRequest::new("What is the pallet quantity total", "s2"))
            .await
            .unwrap();
        assert_eq!(second.cache_tier, Some(CacheTier::L3));
        assert_eq!(second.answer_text, first.answer_text);
        assert_eq!(second.tokens_consumed, 30);
    }

    // ===== History Tests =====

    #[tokio::test]
    async fn test_history_rebuilt_from_store_after_restart() {
        let h = harness("SELECT 1", OrchestratorConfig::default());
        for question in ["first question", "second question"] {
            let record = NewQueryRecord {
                session_id: "s1".into(),
                user_id: "alice".into(),
                question_text: question.into(),
                question_hash: QueryHasher::hash(question),
                generated_query: "SELECT 2".into(),
                result: ResultPayload::default(),
                answer_text: "none".into(),
                complexity: ComplexityClass::Simple,
                tokens_consumed: 1,
                cache_tier: None,
                created_at: Utc::now(),
            }
            .into_record();
            h.records.append(&record).unwrap();
        }

        h.orchestrator.ask(&Alice, AskRequest::new("a brand new topic", "s1")).await.unwrap();
        assert_eq!(*h.generator.histories.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_fallback_answer_text() {
        assert_eq!(fallback_answer(3), "Found 3 result(s).");
        assert_eq!(fallback_answer(0), "Found 0 result(s).");
    }
}
