
//! Database schema definitions for the query record store
use serde::{Deserialize, Serialize};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One result row as returned by the execution collaborator: column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Structured result of executing a generated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_ms: u64,
}

impl ResultPayload {
    pub fn new(rows: Vec<Row>, execution_ms: u64) -> Self {
        let row_count = rows.len();
        Self { rows, row_count, execution_ms }
    }
}

/// Structural complexity of a generated query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityClass {
    Simple,
    Medium,
    Complex,
}

impl ComplexityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityClass::Simple => "simple",
            ComplexityClass::Medium => "medium",
            ComplexityClass::Complex => "complex",
        }
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(ComplexityClass::Simple),
            "medium" => Ok(ComplexityClass::Medium),
            "complex" => Ok(ComplexityClass::Complex),
            other => Err(anyhow::anyhow!("Unknown complexity class: {}", other)),
        }
    }
}

/// Cache tier that satisfied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// Exact fingerprint match
    L1,
    /// Lexical near-match
    L2,
    /// Identical generated query
    L3,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "L1",
            CacheTier::L2 => "L2",
            CacheTier::L3 => "L3",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L1" => Ok(CacheTier::L1),
            "L2" => Ok(CacheTier::L2),
            "L3" => Ok(CacheTier::L3),
            other => Err(anyhow::anyhow!("Unknown cache tier: {}", other)),
        }
    }
}

/// A resolved question that has not been written yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueryRecord {
    pub session_id: String,
    pub user_id: String,
    pub question_text: String,
    pub question_hash: String,
    pub generated_query: String,
    pub result: ResultPayload,
    pub answer_text: String,
    pub complexity: ComplexityClass,
    pub tokens_consumed: u32,
    pub cache_tier: Option<CacheTier>,
    pub created_at: DateTime<Utc>,
}

impl NewQueryRecord {
    /// Assign the record identity. Called by the persistence path at write time.
    pub fn into_record(self) -> QueryRecord {
        QueryRecord {
            id: Uuid::new_v4().to_string(),
            session_id: self.session_id,
            user_id: self.user_id,
            question_text: self.question_text,
            question_hash: self.question_hash,
            generated_query: self.generated_query,
            result: self.result,
            answer_text: self.answer_text,
            complexity: self.complexity,
            tokens_consumed: self.tokens_consumed,
            cache_tier: self.cache_tier,
            created_at: self.created_at,
        }
    }
}

/// The canonical persisted unit. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub question_text: String,
    pub question_hash: String,
    pub generated_query: String,
    pub result: ResultPayload,
    pub answer_text: String,
    pub complexity: ComplexityClass,
    pub tokens_consumed: u32,
    pub cache_tier: Option<CacheTier>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate usage over a time window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_records: i64,
    pub total_tokens: i64,
    pub fresh: i64,
    pub l1_hits: i64,
    pub l2_hits: i64,
    pub l3_hits: i64,
}

impl UsageStats {
    /// Count one record towards the bucket of its tier
    pub fn observe(&mut self, tier: Option<CacheTier>, tokens: i64) {
        self.total_records += 1;
        self.total_tokens += tokens;
        match tier {
            None => self.fresh += 1,
            Some(CacheTier::L1) => self.l1_hits += 1,
            Some(CacheTier::L2) => self.l2_hits += 1,
            Some(CacheTier::L3) => self.l3_hits += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub total_records: i64,
    pub schema_version: i32,
    pub database_size_bytes: i64,
}

/// Fixed-width RFC 3339 so that stored timestamps order lexicographically
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse timestamp '{}': {}", raw, e))?
        .with_timezone(&Utc))
}

/// Initial schema, applied as migration 1
pub const SCHEMA_SQL: &str = "
-- Resolved questions
CREATE TABLE IF NOT EXISTS query_records (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL DEFAULT '',
    user_id TEXT NOT NULL,
    question_text TEXT NOT NULL,
    question_hash TEXT NOT NULL,
    generated_query TEXT NOT NULL CHECK (length(generated_query) > 0),
    result_json TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    execution_ms INTEGER NOT NULL,
    answer_text TEXT NOT NULL,
    complexity TEXT NOT NULL,
    tokens_consumed INTEGER NOT NULL DEFAULT 0,
    cache_tier TEXT,
    created_at TEXT NOT NULL
);
-- Indexes for the tier lookups
CREATE INDEX IF NOT EXISTS idx_records_hash ON query_records (question_hash, created_at);
CREATE INDEX IF NOT EXISTS idx_records_created ON query_records (created_at);
CREATE INDEX IF NOT EXISTS idx_records_query ON query_records (generated_query, created_at);
CREATE INDEX IF NOT EXISTS idx_records_session ON query_records (session_id, created_at);
";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_result_payload_counts_rows() {
        let mut row = Row::new();
        row.insert("count".into(), json!(3));
        let payload = ResultPayload::new(vec![row.clone(), row], 12);
        assert_eq!(payload.row_count, 2);
        assert_eq!(payload.execution_ms, 12);
    }

    #[test]
    fn test_cache_tier_serializes_as_label() {
        assert_eq!(serde_json::to_value(CacheTier::L2).unwrap(), json!("L2"));
        assert_eq!("L3".parse::<CacheTier>().unwrap(), CacheTier::L3);
        assert!("L4".parse::<CacheTier>().is_err());
    }

    #[test]
    fn test_complexity_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ComplexityClass::Medium).unwrap(), json!("medium"));
        assert_eq!("complex".parse::<ComplexityClass>().unwrap(), ComplexityClass::Complex);
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(250);
        let (fa, fb) = (format_timestamp(&a), format_timestamp(&b));
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_timestamp(&fb).unwrap(), b);
    }

    #[test]
    fn test_usage_stats_buckets() {
        let mut stats = UsageStats::default();
        stats.observe(None, 120);
        stats.observe(Some(CacheTier::L1), 0);
        stats.observe(Some(CacheTier::L3), 40);
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_tokens, 160);
        assert_eq!((stats.fresh, stats.l1_hits, stats.l2_hits, stats.l3_hits), (1, 1, 0, 1));
    }
}
