use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lookup windows and thresholds for the cache tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTierConfig {
    /// L1 lookback
    pub exact_window_secs: u64,

    /// L2 lookback
    pub semantic_window_secs: u64,

    /// L2 acceptance: a candidate must score strictly above this
    pub semantic_threshold: f32,

    /// L2 scans at most this many of the newest records
    pub semantic_candidates: usize,

    /// L3 lookback
    pub query_result_window_secs: u64,

    pub query_result_policy: QueryResultPolicy,
}

impl Default for CacheTierConfig {
    fn default() -> Self {
        Self {
            exact_window_secs: 24 * 3600,
            semantic_window_secs: 7 * 24 * 3600,
            semantic_threshold: 0.85,
            semantic_candidates: 50,
            query_result_window_secs: 3600,
            query_result_policy: QueryResultPolicy::Resynthesize,
        }
    }
}

impl CacheTierConfig {
    pub fn exact_window(&self) -> chrono::Duration {
        seconds(self.exact_window_secs)
    }

    pub fn semantic_window(&self) -> chrono::Duration {
        seconds(self.semantic_window_secs)
    }

    pub fn query_result_window(&self) -> chrono::Duration {
        seconds(self.query_result_window_secs)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
}

/// Lower bound of a lookback window. A window reaching past the earliest
/// representable instant has no lower bound.
pub fn window_start(now: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// What an L3 hit reuses besides the stored rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResultPolicy {
    /// Reuse rows, synthesize a fresh answer for the new question
    #[default]
    Resynthesize,
    /// Reuse rows and the stored answer text
    ReuseStoredAnswer,
}

impl FromStr for QueryResultPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resynthesize" => Ok(QueryResultPolicy::Resynthesize),
            "reuse" | "reuse_stored_answer" => Ok(QueryResultPolicy::ReuseStoredAnswer),
            other => Err(anyhow::anyhow!("Unknown L3 policy '{}', expected 'resynthesize' or 'reuse'", other)),
        }
    }
}
