// crates/ask-engine/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::backends::LlmBackendConfig;
use crate::engine::OrchestratorConfig;
use crate::memory::SessionLogConfig;
use crate::query_cache::{CacheTierConfig, QueryResultPolicy};

/// Longest accepted lookback for any cache or history window
pub const MAX_WINDOW_DAYS: u64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub data_db_path: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub request_timeout_seconds: u64,
    pub denied_users: Vec<String>,
    pub l1_window_hours: u64,
    pub l2_window_days: u64,
    pub l2_threshold: f32,
    pub l2_candidates: usize,
    pub l3_window_minutes: u64,
    pub l3_policy: QueryResultPolicy,
    pub history_max_entries: usize,
    pub history_idle_hours: u64,
    pub max_sessions: u64,
    pub persist_queue_size: usize,
    pub expose_error_details: bool,
    pub schema_hint: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any variable source; unset variables take their defaults
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let l2_threshold: f32 = parse_var(&lookup, "ASK_L2_THRESHOLD", 0.85)?;
        if !(0.0..=1.0).contains(&l2_threshold) {
            return Err(anyhow::anyhow!("ASK_L2_THRESHOLD must be within [0, 1], got {}", l2_threshold));
        }

        let denied_users = var("ASK_DENIED_USERS", "")
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();

        let config = Self {
            db_path: var("ASK_DB_PATH", "./data/query_records.db"),
            data_db_path: var("ASK_DATA_DB_PATH", "./data/warehouse.db"),
            llm_base_url: var("LLM_BASE_URL", "http://127.0.0.1:8081"),
            llm_model: var("LLM_MODEL", "local-llm"),
            llm_api_key: lookup("LLM_API_KEY").filter(|k| !k.trim().is_empty()),
            api_host: var("API_HOST", "127.0.0.1"),
            api_port: parse_var(&lookup, "API_PORT", 8000)?,
            request_timeout_seconds: parse_var(&lookup, "ASK_REQUEST_TIMEOUT_SECONDS", 60)?,
            denied_users,
            l1_window_hours: parse_var(&lookup, "ASK_L1_WINDOW_HOURS", 24)?,
            l2_window_days: parse_var(&lookup, "ASK_L2_WINDOW_DAYS", 7)?,
            l2_threshold,
            l2_candidates: parse_var(&lookup, "ASK_L2_CANDIDATES", 50)?,
            l3_window_minutes: parse_var(&lookup, "ASK_L3_WINDOW_MINUTES", 60)?,
            l3_policy: var("ASK_L3_POLICY", "resynthesize").parse()?,
            history_max_entries: parse_var(&lookup, "ASK_HISTORY_MAX_ENTRIES", 10)?,
            history_idle_hours: parse_var(&lookup, "ASK_HISTORY_IDLE_HOURS", 24)?,
            max_sessions: parse_var(&lookup, "ASK_MAX_SESSIONS", 300)?,
            persist_queue_size: parse_var(&lookup, "ASK_PERSIST_QUEUE_SIZE", 1024)?,
            expose_error_details: parse_var(&lookup, "ASK_EXPOSE_ERROR_DETAILS", false)?,
            schema_hint: var("ASK_SCHEMA_HINT", ""),
        };
        config.check_windows()?;
        Ok(config)
    }

    /// Every lookback window must fit within `MAX_WINDOW_DAYS`
    fn check_windows(&self) -> Result<()> {
        let windows = [
            ("ASK_L1_WINDOW_HOURS", self.l1_window_hours, MAX_WINDOW_DAYS * 24),
            ("ASK_L2_WINDOW_DAYS", self.l2_window_days, MAX_WINDOW_DAYS),
            ("ASK_L3_WINDOW_MINUTES", self.l3_window_minutes, MAX_WINDOW_DAYS * 24 * 60),
            ("ASK_HISTORY_IDLE_HOURS", self.history_idle_hours, MAX_WINDOW_DAYS * 24),
        ];
        for (key, value, max) in windows {
            if value > max {
                return Err(anyhow::anyhow!("{} must be at most {}, got {}", key, max, value));
            }
        }
        Ok(())
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Record Database: {}", self.db_path);
        info!("- Data Database: {}", self.data_db_path);
        info!("- LLM Backend: {} (model: {})", self.llm_base_url, self.llm_model);
        info!("- LLM API Key: {}", if self.llm_api_key.is_some() { "set" } else { "unset" });
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- Denied Users: {}", self.denied_users.len());
        info!(
            "- Cache Windows: L1 {}h, L2 {}d (> {} over {} records), L3 {}min ({:?})",
            self.l1_window_hours,
            self.l2_window_days,
            self.l2_threshold,
            self.l2_candidates,
            self.l3_window_minutes,
            self.l3_policy
        );
        info!(
            "- History: {} entries, {}h idle, {} sessions",
            self.history_max_entries, self.history_idle_hours, self.max_sessions
        );
        info!("- Persist Queue Size: {}", self.persist_queue_size);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            cache: CacheTierConfig {
                exact_window_secs: self.l1_window_hours.saturating_mul(3600),
                semantic_window_secs: self.l2_window_days.saturating_mul(24 * 3600),
                semantic_threshold: self.l2_threshold,
                semantic_candidates: self.l2_candidates,
                query_result_window_secs: self.l3_window_minutes.saturating_mul(60),
                query_result_policy: self.l3_policy,
            },
            history: SessionLogConfig {
                max_entries: self.history_max_entries,
                idle_timeout: Duration::from_secs(self.history_idle_hours.saturating_mul(3600)),
                max_sessions: self.max_sessions,
            },
            request_timeout: self.request_timeout(),
            persist_queue_size: self.persist_queue_size,
            ..OrchestratorConfig::default()
        }
    }

    pub fn llm_config(&self) -> LlmBackendConfig {
        LlmBackendConfig {
            base_url: self.llm_base_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            schema_hint: self.schema_hint.clone(),
            request_timeout: self.request_timeout(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}
