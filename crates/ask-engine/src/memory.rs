
//! Session-scoped, time-limited conversation history
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use crate::memory_db::ResultPayload;

/// One prior exchange within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub timestamp: DateTime<Utc>,
    pub question_text: String,
    pub generated_query: String,
    pub answer_text: String,
    pub result: ResultPayload,
}

#[derive(Debug, Clone)]
pub struct SessionLogConfig {
    pub max_entries: usize,
    pub idle_timeout: Duration,
    pub max_sessions: u64,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            idle_timeout: Duration::from_secs(24 * 3600),
            max_sessions: 300,
        }
    }
}

/// Bounded FIFO log per session, dropped after a period of inactivity.
///
/// Appends to one session are a single upsert on that session's key, so
/// concurrent appends never lose entries and never exceed `max_entries`.
/// Different sessions live under different keys and do not contend.
pub struct SessionLog<T: Clone + Send + Sync + 'static> {
    entries: Cache<String, Arc<Vec<T>>>,
    max_entries: usize,
}

impl<T: Clone + Send + Sync + 'static> SessionLog<T> {
    pub fn new(config: &SessionLogConfig) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(config.max_sessions)
                .time_to_idle(config.idle_timeout)
                .build(),
            max_entries: config.max_entries.max(1),
        }
    }

    pub fn append(&self, session_id: &str, item: T) {
        if session_id.is_empty() {
            return;
        }
        let max_entries = self.max_entries;
        self.entries
            .entry(session_id.to_string())
            .and_upsert_with(|existing| {
                let mut items = existing
                    .map(|entry| entry.into_value().as_ref().clone())
                    .unwrap_or_default();
                items.push(item);
                if items.len() > max_entries {
                    let overflow = items.len() - max_entries;
                    items.drain(..overflow);
                }
                Arc::new(items)
            });
    }

    /// Entries of one session, oldest first
    pub fn get(&self, session_id: &str) -> Vec<T> {
        if session_id.is_empty() {
            return Vec::new();
        }
        self.entries
            .get(session_id)
            .map(|items| items.as_ref().clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: &str) {
        self.entries.invalidate(session_id);
    }

    pub fn session_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

/// Per-session conversation history fed to the query generator
pub struct ConversationStore {
    log: SessionLog<ConversationEntry>,
}

impl ConversationStore {
    pub fn new(config: &SessionLogConfig) -> Self {
        Self { log: SessionLog::new(config) }
    }

    pub fn append(&self, session_id: &str, entry: ConversationEntry) {
        self.log.append(session_id, entry);
    }

    pub fn get(&self, session_id: &str) -> Vec<ConversationEntry> {
        self.log.get(session_id)
    }

    pub fn clear(&self, session_id: &str) {
        self.log.clear(session_id);
    }

    pub fn session_count(&self) -> u64 {
        self.log.session_count()
    }

    pub fn max_entries(&self) -> usize {
        self.log.max_entries()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(&SessionLogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: usize) -> ConversationEntry {
        ConversationEntry {
            timestamp: Utc::now(),
            question_text: format!("question {}", i),
            generated_query: format!("SELECT {}", i),
            answer_text: format!("answer {}", i),
            result: ResultPayload::default(),
        }
    }

    // ===== Bounding Tests =====

    #[test]
    fn test_keeps_ten_most_recent_in_order() {
        let store = ConversationStore::default();
        for i in 0..15 {
            store.append("s1", entry(i));
        }
        let history = store.get("s1");
        assert_eq!(history.len(), 10);
        let questions: Vec<_> = history.iter().map(|e| e.question_text.clone()).collect();
        let expected: Vec<_> = (5..15).map(|i| format!("question {}", i)).collect();
        assert_eq!(questions, expected);
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = ConversationStore::default();
        assert!(store.get("nobody").is_empty());
    }

    #[test]
    fn test_empty_session_id_is_ignored() {
        let store = ConversationStore::default();
        store.append("", entry(1));
        assert!(store.get("").is_empty());
        assert_eq!(store.session_count(), 0);
    }

    // ===== Isolation Tests =====

    #[test]
    fn test_sessions_are_isolated() {
        let store = ConversationStore::default();
        store.append("a", entry(1));
        store.append("b", entry(2));
        assert_eq!(store.get("a")[0].question_text, "question 1");
        assert_eq!(store.get("b")[0].question_text, "question 2");
        store.clear("a");
        assert!(store.get("a").is_empty());
        assert_eq!(store.get("b").len(), 1);
    }

    #[test]
    fn test_concurrent_appends_to_one_session() {
        let log: Arc<SessionLog<usize>> = Arc::new(SessionLog::new(&SessionLogConfig {
            max_entries: 1000,
            ..SessionLogConfig::default()
        }));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.append("shared", t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.get("shared").len(), 400);
    }

    // ===== Expiry Tests =====

    #[test]
    fn test_idle_session_expires() {
        let store = ConversationStore::new(&SessionLogConfig {
            idle_timeout: Duration::from_millis(50),
            ..SessionLogConfig::default()
        });
        store.append("s1", entry(1));
        assert_eq!(store.get("s1").len(), 1);
        std::thread::sleep(Duration::from_millis(150));
        assert!(store.get("s1").is_empty());
    }
}
