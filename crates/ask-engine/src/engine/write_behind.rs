//! Write-behind persistence of resolved questions
//!
//! Responses never wait on storage. Jobs go into a bounded queue drained by
//! one detached task; failures are logged and counted, never surfaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::memory::{ConversationEntry, ConversationStore, SessionLogConfig};
use crate::memory_db::{NewQueryRecord, RecordStore};
use crate::metrics;
use crate::query_cache::SessionCache;

/// Everything written after one successful resolution
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub record: NewQueryRecord,
    pub entry: ConversationEntry,
}

/// Destinations of a persistence job
#[derive(Clone)]
pub struct CacheStores {
    pub records: Arc<dyn RecordStore>,
    pub conversations: Arc<ConversationStore>,
    pub session_cache: Arc<SessionCache>,
}

impl CacheStores {
    /// Fresh in-memory session state around an existing record store
    pub fn new(records: Arc<dyn RecordStore>, history: &SessionLogConfig) -> Self {
        Self {
            records,
            conversations: Arc::new(ConversationStore::new(history)),
            session_cache: Arc::new(SessionCache::new(history)),
        }
    }
}

pub struct WriteBehind {
    sender: mpsc::Sender<PersistJob>,
    processed: Arc<AtomicU64>,
}

impl WriteBehind {
    /// Spawn the drain task on the current tokio runtime
    pub fn spawn(stores: CacheStores, queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let processed = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_worker(receiver, stores, Arc::clone(&processed)));
        Self { sender, processed }
    }

    /// Queue a job without waiting. A full or closed queue drops the job.
    pub fn enqueue(&self, job: PersistJob) {
        if let Err(e) = self.sender.try_send(job) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "queue closed",
            };
            warn!("Dropping persistence job: {}", reason);
            metrics::inc_persist_failure();
        }
    }

    /// Jobs the worker has finished with, successful or not
    pub fn processed_jobs(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<PersistJob>, stores: CacheStores, processed: Arc<AtomicU64>) {
    while let Some(job) = receiver.recv().await {
        persist(&stores, job).await;
        processed.fetch_add(1, Ordering::SeqCst);
    }
    debug!("Write-behind worker stopped");
}

async fn persist(stores: &CacheStores, job: PersistJob) {
    let PersistJob { record, entry } = job;
    let session_id = record.session_id.clone();

    stores.conversations.append(&session_id, entry);

    let record = record.into_record();
    let records = Arc::clone(&stores.records);
    let to_store = record.clone();
    match tokio::task::spawn_blocking(move || records.append(&to_store)).await {
        Ok(Ok(())) => debug!("Persisted query record {}", record.id),
        Ok(Err(e)) => {
            warn!("Failed to persist query record {}: {}", record.id, e);
            metrics::inc_persist_failure();
        }
        Err(e) => {
            warn!("Persistence task for record {} panicked: {}", record.id, e);
            metrics::inc_persist_failure();
        }
    }

    stores.session_cache.remember(&session_id, record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{ComplexityClass, InMemoryRecordStore, ResultPayload};
    use chrono::Utc;
    use std::time::Duration;

    fn job(session: &str, question: &str) -> PersistJob {
        let now = Utc::now();
        PersistJob {
            record: NewQueryRecord {
                session_id: session.into(),
                user_id: "alice".into(),
                question_text: question.into(),
                question_hash: crate::query_cache::QueryHasher::hash(question),
                generated_query: "SELECT 1".into(),
                result: ResultPayload::default(),
                answer_text: "one".into(),
                complexity: ComplexityClass::Simple,
                tokens_consumed: 10,
                cache_tier: None,
                created_at: now,
            },
            entry: ConversationEntry {
                timestamp: now,
                question_text: question.into(),
                generated_query: "SELECT 1".into(),
                answer_text: "one".into(),
                result: ResultPayload::default(),
            },
        }
    }

    fn stores(records: Arc<dyn RecordStore>) -> CacheStores {
        CacheStores::new(records, &SessionLogConfig::default())
    }

    async fn wait_for(write_behind: &WriteBehind, jobs: u64) {
        for _ in 0..200 {
            if write_behind.processed_jobs() >= jobs {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("write-behind did not process {} jobs", jobs);
    }

    #[tokio::test]
    async fn test_job_reaches_every_store() {
        let records = Arc::new(InMemoryRecordStore::new());
        let stores = stores(records.clone());
        let write_behind = WriteBehind::spawn(stores.clone(), 8);

        write_behind.enqueue(job("s1", "How many pallets?"));
        wait_for(&write_behind, 1).await;

        assert_eq!(records.len(), 1);
        assert_eq!(stores.conversations.get("s1").len(), 1);
        assert_eq!(stores.session_cache.recent("s1").len(), 1);
        assert!(!stores.session_cache.recent("s1")[0].id.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_still_updates_memory() {
        struct Broken;
        impl RecordStore for Broken {
            fn append(&self, _: &crate::memory_db::QueryRecord) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("disk I/O error"))
            }
            fn latest_by_hash(&self, _: &str, _: chrono::DateTime<Utc>) -> anyhow::Result<Option<crate::memory_db::QueryRecord>> {
                Ok(None)
            }
            fn recent(&self, _: chrono::DateTime<Utc>, _: usize) -> anyhow::Result<Vec<crate::memory_db::QueryRecord>> {
                Ok(Vec::new())
            }
            fn latest_by_query(&self, _: &str, _: chrono::DateTime<Utc>) -> anyhow::Result<Option<crate::memory_db::QueryRecord>> {
                Ok(None)
            }
            fn recent_for_session(&self, _: &str, _: chrono::DateTime<Utc>, _: usize) -> anyhow::Result<Vec<crate::memory_db::QueryRecord>> {
                Ok(Vec::new())
            }
            fn usage_stats(&self, _: chrono::DateTime<Utc>) -> anyhow::Result<crate::memory_db::UsageStats> {
                Ok(Default::default())
            }
        }

        let stores = stores(Arc::new(Broken));
        let write_behind = WriteBehind::spawn(stores.clone(), 8);
        write_behind.enqueue(job("s1", "q"));
        wait_for(&write_behind, 1).await;
        assert_eq!(stores.conversations.get("s1").len(), 1);
    }
}
