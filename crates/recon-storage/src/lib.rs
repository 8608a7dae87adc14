//! Canonical store, checkpoint persistence and remote HTTP access for the pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recon_core::{CanonicalRecord, Classification, JobId};
use thiserror::Error;

pub mod http;
pub mod memory;
pub mod postgres;

pub use http::{BackoffPolicy, Credentials, FetchError, HttpClientConfig, HttpFetcher};
pub use memory::{MemoryCanonicalStore, MemoryCheckpointStore};
pub use postgres::{PgCanonicalStore, PgCheckpointStore};

pub const CRATE_NAME: &str = "recon-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("field serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("write rejected for {remote_id}: {reason}")]
    Rejected { remote_id: String, reason: String },
}

/// A normalized record together with what the change detector decided for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWrite {
    pub record: CanonicalRecord,
    pub classification: Classification,
}

/// Local canonical store. Only the batch persister mutates it.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Stored fingerprints for the ids that already exist; absent ids are simply missing.
    async fn stored_hashes(
        &self,
        job: JobId,
        remote_ids: &[String],
    ) -> Result<HashMap<String, String>, StoreError>;

    /// Applies every write of the batch atomically, or none of them.
    ///
    /// Creates and updates rewrite fields and hash; `first_seen_at` is only set on
    /// insert. Unchanged rows only get their `last_seen_at` touched.
    async fn apply_batch(
        &self,
        job: JobId,
        writes: &[PlannedWrite],
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, job: JobId, remote_id: &str) -> Result<Option<CanonicalRecord>, StoreError>;

    /// Up to `limit` remote ids of `job` strictly after `after`, in key order.
    async fn remote_ids_after(
        &self,
        job: JobId,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn last_run_at(&self, job: JobId) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn set_last_run_at(&self, job: JobId, at: DateTime<Utc>) -> Result<(), StoreError>;
}
