use chrono::{DateTime, Utc};
use crate::memory::{SessionLog, SessionLogConfig};
use crate::memory_db::QueryRecord;

/// Recent resolved records per session, kept apart from the durable store.
///
/// Serves as the in-memory fast path for exact-match lookups within the
/// current session.
pub struct SessionCache {
    log: SessionLog<QueryRecord>,
}

impl SessionCache {
    pub fn new(config: &SessionLogConfig) -> Self {
        Self { log: SessionLog::new(config) }
    }

    pub fn remember(&self, session_id: &str, record: QueryRecord) {
        self.log.append(session_id, record);
    }

    /// Records of one session, oldest first
    pub fn recent(&self, session_id: &str) -> Vec<QueryRecord> {
        self.log.get(session_id)
    }

    /// Newest record of this session with the given fingerprint, created at or after `since`
    pub fn find_exact(&self, session_id: &str, question_hash: &str, since: DateTime<Utc>) -> Option<QueryRecord> {
        self.log
            .get(session_id)
            .into_iter()
            .rev()
            .find(|record| record.question_hash == question_hash && record.created_at >= since)
    }

    pub fn session_count(&self) -> u64 {
        self.log.session_count()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(&SessionLogConfig::default())
    }
}
