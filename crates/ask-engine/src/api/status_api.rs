// Service status and usage reporting
use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::api::ask_api::ErrorResponse;
use crate::memory_db::UsageStats;
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub record_store: bool,
    pub llm_configured: bool,
    /// `None` when no data database is configured
    pub data_source: Option<bool>,
    pub active_sessions: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub since: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: UsageStats,
}

/// Health of each dependency
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stores = state.orchestrator.stores();
    let record_store = match stores.records.usage_stats(Utc::now()) {
        Ok(_) => true,
        Err(e) => {
            warn!("Record store unreachable: {}", e);
            false
        }
    };
    let data_source = state.data_source.as_ref().map(|executor| match executor.check() {
        Ok(()) => true,
        Err(e) => {
            warn!("Data database unavailable: {}", e);
            false
        }
    });
    let llm_configured = !state.config.llm_base_url.trim().is_empty();
    let healthy = record_store && llm_configured && data_source.unwrap_or(true);

    Json(StatusResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        record_store,
        llm_configured,
        data_source,
        active_sessions: stores.conversations.session_count(),
        timestamp: Utc::now(),
    })
}

/// Record counts and token spend over the last 24 hours
pub async fn usage(
    State(state): State<AppState>,
) -> Result<Json<UsageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let since = Utc::now() - chrono::Duration::hours(24);
    match state.orchestrator.stores().records.usage_stats(since) {
        Ok(stats) => Ok(Json(UsageResponse { since, stats })),
        Err(e) => {
            warn!("Failed to read usage statistics: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Usage statistics unavailable".to_string(),
                    kind: "InternalError".to_string(),
                    details: None,
                }),
            ))
        }
    }
}
