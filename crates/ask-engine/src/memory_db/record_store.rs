//! Durable query record storage
//!
//! Records are append-only. Every lookup is bounded by a `since` timestamp and
//! returns the newest match first, ties broken by insertion order.

use crate::memory_db::schema::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Persistence seam for query records
pub trait RecordStore: Send + Sync {
    /// Durably write one record
    fn append(&self, record: &QueryRecord) -> anyhow::Result<()>;

    /// Most recent record with this question fingerprint created at or after `since`
    fn latest_by_hash(&self, question_hash: &str, since: DateTime<Utc>) -> anyhow::Result<Option<QueryRecord>>;

    /// Up to `limit` records created at or after `since`, newest first
    fn recent(&self, since: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueryRecord>>;

    /// Most recent record whose generated query is byte-identical to `query`
    fn latest_by_query(&self, query: &str, since: DateTime<Utc>) -> anyhow::Result<Option<QueryRecord>>;

    /// The last `limit` records of a session, oldest first
    fn recent_for_session(&self, session_id: &str, since: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueryRecord>>;

    /// Usage aggregate over records created at or after `since`
    fn usage_stats(&self, since: DateTime<Utc>) -> anyhow::Result<UsageStats>;
}

const RECORD_COLUMNS: &str = "id, session_id, user_id, question_text, question_hash, generated_query, \
     result_json, row_count, execution_ms, answer_text, complexity, tokens_consumed, cache_tier, created_at";

/// SQLite-backed record store sharing the database connection pool
pub struct SqliteRecordStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteRecordStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    fn row_to_record(row: &rusqlite::Row) -> anyhow::Result<QueryRecord> {
        let result_json: String = row.get(6)?;
        let rows: Vec<Row> = serde_json::from_str(&result_json)
            .map_err(|e| anyhow::anyhow!("Result JSON error: {}", e))?;
        let row_count: i64 = row.get(7)?;
        let execution_ms: i64 = row.get(8)?;
        let complexity: String = row.get(10)?;
        let tokens: i64 = row.get(11)?;
        let cache_tier: Option<String> = row.get(12)?;
        let created_at: String = row.get(13)?;

        Ok(QueryRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            question_text: row.get(3)?,
            question_hash: row.get(4)?,
            generated_query: row.get(5)?,
            result: ResultPayload {
                rows,
                row_count: row_count.max(0) as usize,
                execution_ms: execution_ms.max(0) as u64,
            },
            answer_text: row.get(9)?,
            complexity: complexity.parse()?,
            tokens_consumed: tokens.clamp(0, u32::MAX as i64) as u32,
            cache_tier: cache_tier.map(|t| t.parse()).transpose()?,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> anyhow::Result<Vec<QueryRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            match Self::row_to_record(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable query record: {}", e),
            }
        }
        Ok(records)
    }

    fn query_one<P: rusqlite::Params>(&self, sql: &str, params: P) -> anyhow::Result<Option<QueryRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        stmt.query_row(params, |row| Ok(Self::row_to_record(row)))
            .optional()?
            .transpose()
    }
}

impl RecordStore for SqliteRecordStore {
    fn append(&self, record: &QueryRecord) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        let result_json = serde_json::to_string(&record.result.rows)?;
        conn.execute(
            &format!(
                "INSERT INTO query_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                RECORD_COLUMNS
            ),
            params![
                record.id,
                record.session_id,
                record.user_id,
                record.question_text,
                record.question_hash,
                record.generated_query,
                result_json,
                record.result.row_count as i64,
                record.result.execution_ms as i64,
                record.answer_text,
                record.complexity.as_str(),
                record.tokens_consumed as i64,
                record.cache_tier.map(|t| t.as_str()),
                format_timestamp(&record.created_at),
            ],
        )?;
        debug!("Stored query record {} for session '{}'", record.id, record.session_id);
        Ok(())
    }

    fn latest_by_hash(&self, question_hash: &str, since: DateTime<Utc>) -> anyhow::Result<Option<QueryRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM query_records WHERE question_hash = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                RECORD_COLUMNS
            ),
            params![question_hash, format_timestamp(&since)],
        )
    }

    fn recent(&self, since: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueryRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM query_records WHERE created_at >= ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                RECORD_COLUMNS
            ),
            params![format_timestamp(&since), limit as i64],
        )
    }

    fn latest_by_query(&self, query: &str, since: DateTime<Utc>) -> anyhow::Result<Option<QueryRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM query_records WHERE generated_query = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                RECORD_COLUMNS
            ),
            params![query, format_timestamp(&since)],
        )
    }

    fn recent_for_session(&self, session_id: &str, since: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueryRecord>> {
        let mut records = self.query_records(
            &format!(
                "SELECT {} FROM query_records WHERE session_id = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3",
                RECORD_COLUMNS
            ),
            params![session_id, format_timestamp(&since), limit as i64],
        )?;
        records.reverse();
        Ok(records)
    }

    fn usage_stats(&self, since: DateTime<Utc>) -> anyhow::Result<UsageStats> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT cache_tier, COUNT(*), COALESCE(SUM(tokens_consumed), 0)
             FROM query_records WHERE created_at >= ?1 GROUP BY cache_tier",
        )?;
        let mut rows = stmt.query(params![format_timestamp(&since)])?;
        let mut stats = UsageStats::default();
        while let Some(row) = rows.next()? {
            let tier: Option<String> = row.get(0)?;
            let count: i64 = row.get(1)?;
            let tokens: i64 = row.get(2)?;
            let tier = tier.map(|t| t.parse::<CacheTier>()).transpose()?;
            stats.total_records += count;
            stats.total_tokens += tokens;
            match tier {
                None => stats.fresh += count,
                Some(CacheTier::L1) => stats.l1_hits += count,
                Some(CacheTier::L2) => stats.l2_hits += count,
                Some(CacheTier::L3) => stats.l3_hits += count,
            }
        }
        Ok(stats)
    }
}

/// Process-local record store for tests and ephemeral deployments
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: DashMap<u64, QueryRecord>,
    sequence: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Matching records, newest first
    fn collect_where<F>(&self, since: DateTime<Utc>, predicate: F) -> Vec<QueryRecord>
    where
        F: Fn(&QueryRecord) -> bool,
    {
        let mut matches: Vec<(u64, QueryRecord)> = self
            .records
            .iter()
            .filter(|entry| entry.value().created_at >= since && predicate(entry.value()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        matches.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        matches.into_iter().map(|(_, record)| record).collect()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn append(&self, record: &QueryRecord) -> anyhow::Result<()> {
        if record.generated_query.is_empty() {
            return Err(anyhow::anyhow!("Refusing to store a record without a generated query"));
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.records.insert(seq, record.clone());
        Ok(())
    }

    fn latest_by_hash(&self, question_hash: &str, since: DateTime<Utc>) -> anyhow::Result<Option<QueryRecord>> {
        Ok(self.collect_where(since, |r| r.question_hash == question_hash).into_iter().next())
    }

    fn recent(&self, since: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueryRecord>> {
        let mut records = self.collect_where(since, |_| true);
        records.truncate(limit);
        Ok(records)
    }

    fn latest_by_query(&self, query: &str, since: DateTime<Utc>) -> anyhow::Result<Option<QueryRecord>> {
        Ok(self.collect_where(since, |r| r.generated_query == query).into_iter().next())
    }

    fn recent_for_session(&self, session_id: &str, since: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueryRecord>> {
        let mut records = self.collect_where(since, |r| r.session_id == session_id);
        records.truncate(limit);
        records.reverse();
        Ok(records)
    }

    fn usage_stats(&self, since: DateTime<Utc>) -> anyhow::Result<UsageStats> {
        let mut stats = UsageStats::default();
        for record in self.collect_where(since, |_| true) {
            stats.observe(record.cache_tier, record.tokens_consumed as i64);
        }
        Ok(stats)
    }
}
