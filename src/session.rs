use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::eval::EvaluationRecord;
use crate::report::ReportSections;

/// Everything stored for one evaluation batch: the records keyed by report
/// filename, plus the section toggles chosen when the batch was submitted.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub sections: ReportSections,
    pub records: HashMap<String, EvaluationRecord>,
}

struct SessionEntry {
    created_at: Instant,
    data: SessionData,
}

/// In-process store of evaluation batches for later report retrieval.
///
/// Entries expire after the configured TTL and are swept on every insert and
/// lookup, so a long-running process does not accumulate batches forever.
/// Expired sessions read as absent, which callers surface as "not found or
/// expired".
#[derive(Clone)]
pub struct SessionStore {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stores a finished batch under a fresh session identifier.
    pub async fn put(
        &self,
        records: HashMap<String, EvaluationRecord>,
        sections: ReportSections,
    ) -> Uuid {
        let session_id = Uuid::new_v4();
        let mut guard = self.inner.write().await;
        sweep(&mut guard, self.ttl);
        guard.insert(
            session_id,
            SessionEntry {
                created_at: Instant::now(),
                data: SessionData { sections, records },
            },
        );
        session_id
    }

    /// One record plus the batch's section toggles, or `None` for an
    /// unknown/expired session or filename.
    pub async fn get(
        &self,
        session_id: Uuid,
        filename: &str,
    ) -> Option<(EvaluationRecord, ReportSections)> {
        let guard = self.inner.read().await;
        let entry = guard.get(&session_id)?;
        if entry.created_at.elapsed() >= self.ttl {
            return None;
        }
        let record = entry.data.records.get(filename)?.clone();
        Some((record, entry.data.sections))
    }

    /// The whole batch, or `None` for an unknown/expired session.
    pub async fn data(&self, session_id: Uuid) -> Option<SessionData> {
        let guard = self.inner.read().await;
        let entry = guard.get(&session_id)?;
        if entry.created_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.data.clone())
    }
}

fn sweep(map: &mut HashMap<Uuid, SessionEntry>, ttl: Duration) {
    let before = map.len();
    map.retain(|_, entry| entry.created_at.elapsed() < ttl);
    let evicted = before - map.len();
    if evicted > 0 {
        debug!(evicted, "expired evaluation sessions swept");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_record(name: &str) -> HashMap<String, EvaluationRecord> {
        let mut records = HashMap::new();
        records.insert(
            format!("{name}_Evaluation_Report.pdf"),
            EvaluationRecord::failure(name, "placeholder"),
        );
        records
    }

    #[tokio::test]
    async fn stored_batches_are_retrievable_by_filename() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store
            .put(one_record("Jane"), ReportSections::default())
            .await;

        let (record, _) = store.get(id, "Jane_Evaluation_Report.pdf").await.unwrap();
        assert_eq!(record.student_name, "Jane");

        assert!(store.get(id, "missing.pdf").await.is_none());
        assert!(store.get(Uuid::new_v4(), "missing.pdf").await.is_none());
        assert_eq!(store.data(id).await.unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn expired_sessions_read_as_absent() {
        let store = SessionStore::new(Duration::ZERO);
        let id = store
            .put(one_record("Jane"), ReportSections::default())
            .await;
        assert!(store.get(id, "Jane_Evaluation_Report.pdf").await.is_none());
        assert!(store.data(id).await.is_none());
    }

    #[tokio::test]
    async fn inserts_sweep_expired_entries() {
        let store = SessionStore::new(Duration::ZERO);
        let first = store
            .put(one_record("Jane"), ReportSections::default())
            .await;
        store.put(one_record("John"), ReportSections::default()).await;

        let guard = store.inner.read().await;
        assert!(!guard.contains_key(&first));
    }
}
