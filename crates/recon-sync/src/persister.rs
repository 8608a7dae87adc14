use std::sync::Arc;

use chrono::{DateTime, Utc};
use recon_core::{classify, CanonicalRecord, JobId, RunCounts};
use recon_storage::{CanonicalStore, PlannedWrite, StoreError};
use tracing::{debug, warn};

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Writes normalized records to the canonical store one transaction per batch.
///
/// A failed batch is rolled back and counted as `failed` in full; the caller keeps
/// feeding the next batch.
#[derive(Clone)]
pub struct BatchPersister {
    store: Arc<dyn CanonicalStore>,
    batch_size: usize,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn CanonicalStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        &self.store
    }

    /// Classifies `records` against the stored fingerprints and applies them.
    pub async fn persist(
        &self,
        job: JobId,
        records: Vec<CanonicalRecord>,
        seen_at: DateTime<Utc>,
    ) -> RunCounts {
        if records.is_empty() {
            return RunCounts::default();
        }
        let size = records.len();
        match self.plan(job, records).await {
            Ok(writes) => self.apply_batch(job, writes, seen_at).await,
            Err(err) => {
                warn!(%job, records = size, error = %err, "looking up stored hashes failed; batch counted as failed");
                let mut counts = RunCounts::default();
                counts.record_failed(size);
                counts
            }
        }
    }

    /// Applies already classified writes in one transaction and returns the partial counts.
    pub async fn apply_batch(
        &self,
        job: JobId,
        writes: Vec<PlannedWrite>,
        seen_at: DateTime<Utc>,
    ) -> RunCounts {
        let mut counts = RunCounts::default();
        if writes.is_empty() {
            return counts;
        }

        match self.store.apply_batch(job, &writes, seen_at).await {
            Ok(()) => {
                for write in &writes {
                    counts.record(write.classification);
                }
                debug!(
                    %job,
                    created = counts.created,
                    updated = counts.updated,
                    unchanged = counts.unchanged,
                    "batch committed"
                );
            }
            Err(err) => {
                warn!(%job, records = writes.len(), error = %err, "batch rolled back");
                counts.record_failed(writes.len());
            }
        }
        counts
    }

    async fn plan(
        &self,
        job: JobId,
        records: Vec<CanonicalRecord>,
    ) -> Result<Vec<PlannedWrite>, StoreError> {
        let ids: Vec<String> = records.iter().map(|r| r.remote_id.clone()).collect();
        let stored = self.store.stored_hashes(job, &ids).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let classification =
                    classify(&record, stored.get(&record.remote_id).map(String::as_str));
                PlannedWrite {
                    record,
                    classification,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::{content_hash, FieldValue, Fields};
    use recon_storage::MemoryCanonicalStore;

    fn record(id: &str, status: &str) -> CanonicalRecord {
        let mut fields = Fields::new();
        fields.insert("status".into(), FieldValue::Text(status.into()));
        CanonicalRecord {
            remote_id: id.into(),
            content_hash: content_hash(&fields),
            fields,
            first_seen_at: None,
            last_seen_at: None,
        }
    }

    #[tokio::test]
    async fn classifies_against_stored_hashes() {
        let store = Arc::new(MemoryCanonicalStore::new());
        let persister = BatchPersister::new(store.clone(), 10);
        let now = Utc::now();

        let first = persister
            .persist(JobId::Reservations, vec![record("1", "open"), record("2", "open")], now)
            .await;
        assert_eq!(first.created, 2);

        let second = persister
            .persist(JobId::Reservations, vec![record("1", "open"), record("2", "sold"), record("3", "open")], now)
            .await;
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.updated, 1);
        assert_eq!(second.created, 1);
        assert!(second.is_balanced());
        assert_eq!(store.row_writes().await, 4);
    }

    #[tokio::test]
    async fn rejected_batch_counts_every_record_as_failed() {
        let store = Arc::new(MemoryCanonicalStore::new());
        store.reject_remote_id("2").await;
        let persister = BatchPersister::new(store.clone(), 10);

        let counts = persister
            .persist(JobId::ErpContracts, vec![record("1", "a"), record("2", "b"), record("3", "c")], Utc::now())
            .await;
        assert_eq!(counts.failed, 3);
        assert_eq!(counts.total, 3);
        assert_eq!(store.len(JobId::ErpContracts).await, 0);
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let persister = BatchPersister::new(Arc::new(MemoryCanonicalStore::new()), 0);
        assert_eq!(persister.batch_size(), 1);
    }
}
