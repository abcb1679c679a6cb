//! HTTP server startup
//!
//! Wires the record database, the reference collaborators and the
//! orchestrator together, then serves the question API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    backends::{DenyListPolicy, LlmBackend, SqliteQueryExecutor},
    config::Config,
    engine::{CacheStores, Collaborators, QueryOrchestrator},
    memory_db::{QueryDatabase, RecordStore},
    shared_state::AppState,
};

/// Grace period on top of the request timeout before the HTTP layer gives up
const HTTP_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let db_path = Path::new(&cfg.db_path);
    let records: Arc<dyn RecordStore> = match QueryDatabase::new(db_path) {
        Ok(db) => {
            info!("Query record database initialized at: {}", db_path.display());
            db.records.clone()
        }
        Err(e) => {
            warn!("Failed to initialize query record database: {}. Falling back to in-memory.", e);
            QueryDatabase::new_in_memory()?.records.clone()
        }
    };

    let llm = Arc::new(LlmBackend::new(cfg.llm_config())?);
    let executor = Arc::new(SqliteQueryExecutor::new(&cfg.data_db_path));
    if let Err(e) = executor.check() {
        warn!("Data database not available yet: {}", e);
    }

    let orchestrator_config = cfg.orchestrator_config();
    let stores = CacheStores::new(records, &orchestrator_config.history);
    let collaborators = Collaborators {
        generator: llm.clone(),
        executor: executor.clone(),
        synthesizer: llm,
        policy: Arc::new(DenyListPolicy::new(&cfg.denied_users)),
    };
    let orchestrator = Arc::new(QueryOrchestrator::new(collaborators, stores, orchestrator_config)?);

    let addr = cfg.api_addr()?;
    let state = AppState::new(orchestrator, Arc::new(cfg)).with_data_source(executor);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> axum::Router {
    use axum::{
        Router,
        routing::{get, post},
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
        timeout::TimeoutLayer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);
    let http_timeout = state.config.request_timeout() + HTTP_TIMEOUT_GRACE;

    Router::new()
        .route("/ask", post(crate::api::ask))
        .route("/ask/status", get(crate::api::status))
        .route("/ask/usage", get(crate::api::usage))
        .route("/metrics", get(crate::metrics::get_metrics))
        .route("/healthz", get(|| async { "OK" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(http_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        AccessPolicy, AnswerSynthesizer, ExecutionOutcome, GeneratedQuery, Identity, OrchestratorConfig,
        QueryExecutor, QueryGenerator, SynthesizedAnswer,
    };
    use crate::memory::ConversationEntry;
    use crate::memory_db::{InMemoryRecordStore, Row};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Scripted(&'static str);

    #[async_trait]
    impl QueryGenerator for Scripted {
        async fn generate(&self, _: &str, _: &[ConversationEntry], _: &Identity) -> anyhow::Result<GeneratedQuery> {
            Ok(GeneratedQuery { query: self.0.to_string(), tokens_used: 10 })
        }
    }

    #[async_trait]
    impl QueryExecutor for Scripted {
        async fn execute(&self, _: &str) -> anyhow::Result<ExecutionOutcome> {
            Ok(ExecutionOutcome { rows: vec![Row::new()], duration_ms: 1 })
        }
    }

    #[async_trait]
    impl AnswerSynthesizer for Scripted {
        async fn synthesize(&self, _: &str, _: &str, rows: &[Row]) -> anyhow::Result<SynthesizedAnswer> {
            Ok(SynthesizedAnswer { answer: format!("{} row", rows.len()), tokens_used: 5 })
        }
    }

    struct NotMallory;

    impl AccessPolicy for NotMallory {
        fn is_allowed(&self, user_id: &str) -> bool {
            user_id != "mallory"
        }
    }

    fn app(query: &'static str, expose_details: bool) -> axum::Router {
        let scripted = Arc::new(Scripted(query));
        let orchestrator = QueryOrchestrator::new(
            Collaborators {
                generator: scripted.clone(),
                executor: scripted.clone(),
                synthesizer: scripted,
                policy: Arc::new(NotMallory),
            },
            CacheStores::new(Arc::new(InMemoryRecordStore::new()), &Default::default()),
            OrchestratorConfig::default(),
        )
        .unwrap();
        let mut config = Config::from_vars(|_| None).unwrap();
        config.expose_error_details = expose_details;
        build_router(AppState::new(Arc::new(orchestrator), Arc::new(config)))
    }

    fn ask_request(user: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ===== Ask Endpoint Tests =====

    #[tokio::test]
    async fn test_ask_returns_camel_case_response() {
        let response = app("SELECT 1", false)
            .oneshot(ask_request(Some("alice"), json!({"question": "How many?", "sessionId": "s1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["generatedQuery"], "SELECT 1");
        assert_eq!(body["answerText"], "1 row");
        assert_eq!(body["cached"], false);
        assert_eq!(body["cacheTier"], Value::Null);
        assert_eq!(body["tokensConsumed"], 15);
        assert_eq!(body["resultPayload"]["rowCount"], 1);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_missing_identity_is_forbidden() {
        let response = app("SELECT 1", false)
            .oneshot(ask_request(None, json!({"question": "How many?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["kind"], "Forbidden");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_denied_user_is_forbidden() {
        let response = app("SELECT 1", false)
            .oneshot(ask_request(Some("mallory"), json!({"question": "How many?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_generation_error_maps_to_422_with_details() {
        let response = app("DROP TABLE x", true)
            .oneshot(ask_request(Some("alice"), json!({"question": "Remove everything"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["kind"], "GenerationError");
        assert!(body["details"].as_str().unwrap().contains("read-only"));
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let response = app("SELECT 1", false)
            .oneshot(ask_request(Some("alice"), json!({"question": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ===== Status Endpoint Tests =====

    #[tokio::test]
    async fn test_status_and_usage() {
        let router = app("SELECT 1", false);
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/ask/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["recordStore"], true);

        let response = router
            .oneshot(Request::builder().uri("/ask/usage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["totalRecords"], 0);
    }

    #[tokio::test]
    async fn test_healthz_and_metrics() {
        let router = app("SELECT 1", false);
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
