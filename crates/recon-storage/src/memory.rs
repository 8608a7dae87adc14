//! In-process stores used for dry runs and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recon_core::{CanonicalRecord, Classification, JobId};
use tokio::sync::Mutex;

use crate::{CanonicalStore, CheckpointStore, PlannedWrite, StoreError};

#[derive(Debug, Default)]
pub struct MemoryCanonicalStore {
    rows: Mutex<BTreeMap<(JobId, String), CanonicalRecord>>,
    rejected: Mutex<HashSet<String>>,
    row_writes: Mutex<usize>,
}

impl MemoryCanonicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any batch containing this remote id fails as a whole, like a constraint violation would.
    pub async fn reject_remote_id(&self, remote_id: impl Into<String>) {
        self.rejected.lock().await.insert(remote_id.into());
    }

    pub async fn clear_rejections(&self) {
        self.rejected.lock().await.clear();
    }

    pub async fn len(&self, job: JobId) -> usize {
        self.rows.lock().await.keys().filter(|(j, _)| *j == job).count()
    }

    /// Number of field rewrites (creates and updates) applied so far.
    pub async fn row_writes(&self) -> usize {
        *self.row_writes.lock().await
    }
}

#[async_trait]
impl CanonicalStore for MemoryCanonicalStore {
    async fn stored_hashes(
        &self,
        job: JobId,
        remote_ids: &[String],
    ) -> Result<HashMap<String, String>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(remote_ids
            .iter()
            .filter_map(|id| {
                rows.get(&(job, id.clone()))
                    .map(|row| (id.clone(), row.content_hash.clone()))
            })
            .collect())
    }

    async fn apply_batch(
        &self,
        job: JobId,
        writes: &[PlannedWrite],
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let rejected = self.rejected.lock().await;
        if let Some(bad) = writes
            .iter()
            .find(|w| rejected.contains(&w.record.remote_id))
        {
            return Err(StoreError::Rejected {
                remote_id: bad.record.remote_id.clone(),
                reason: "constraint violation".to_string(),
            });
        }
        drop(rejected);

        let mut rows = self.rows.lock().await;
        let mut row_writes = self.row_writes.lock().await;
        for write in writes {
            let key = (job, write.record.remote_id.clone());
            match write.classification {
                Classification::Unchanged => {
                    if let Some(row) = rows.get_mut(&key) {
                        row.last_seen_at = Some(seen_at);
                    }
                }
                Classification::Create | Classification::Update => {
                    let first_seen_at = rows
                        .get(&key)
                        .and_then(|row| row.first_seen_at)
                        .unwrap_or(seen_at);
                    let mut record = write.record.clone();
                    record.first_seen_at = Some(first_seen_at);
                    record.last_seen_at = Some(seen_at);
                    rows.insert(key, record);
                    *row_writes += 1;
                }
            }
        }
        Ok(())
    }

    async fn get(&self, job: JobId, remote_id: &str) -> Result<Option<CanonicalRecord>, StoreError> {
        Ok(self.rows.lock().await.get(&(job, remote_id.to_string())).cloned())
    }

    async fn remote_ids_after(
        &self,
        job: JobId,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let lower = match after {
            Some(after) => Bound::Excluded((job, after.to_string())),
            None => Bound::Included((job, String::new())),
        };
        Ok(self
            .rows
            .lock()
            .await
            .range((lower, Bound::Unbounded))
            .take_while(|((j, _), _)| *j == job)
            .take(limit)
            .map(|((_, id), _)| id.clone())
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<JobId, DateTime<Utc>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn last_run_at(&self, job: JobId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.checkpoints.lock().await.get(&job).copied())
    }

    async fn set_last_run_at(&self, job: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.checkpoints.lock().await.insert(job, at);
        Ok(())
    }
}
