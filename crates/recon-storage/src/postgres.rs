//! Postgres-backed canonical store and checkpoints.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recon_core::{CanonicalRecord, Classification, Fields, JobId};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::{CanonicalStore, CheckpointStore, PlannedWrite, StoreError};

#[derive(Debug, Clone)]
pub struct PgCanonicalStore {
    pool: PgPool,
}

impl PgCanonicalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CanonicalStore for PgCanonicalStore {
    async fn stored_hashes(
        &self,
        job: JobId,
        remote_ids: &[String],
    ) -> Result<HashMap<String, String>, StoreError> {
        if remote_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT remote_id, content_hash
              FROM canonical_records
             WHERE job = $1
               AND remote_id = ANY($2)
            "#,
        )
        .bind(job.as_str())
        .bind(remote_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get("remote_id")?, row.try_get("content_hash")?);
        }
        Ok(out)
    }

    async fn apply_batch(
        &self,
        job: JobId,
        writes: &[PlannedWrite],
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut unchanged = Vec::new();
        for write in writes {
            if write.classification == Classification::Unchanged {
                unchanged.push(write.record.remote_id.clone());
                continue;
            }
            let fields = serde_json::to_value(&write.record.fields)?;
            sqlx::query(
                r#"
                INSERT INTO canonical_records
                       (job, remote_id, fields, content_hash, first_seen_at, last_seen_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                ON CONFLICT (job, remote_id) DO UPDATE
                   SET fields = EXCLUDED.fields,
                       content_hash = EXCLUDED.content_hash,
                       last_seen_at = EXCLUDED.last_seen_at
                "#,
            )
            .bind(job.as_str())
            .bind(&write.record.remote_id)
            .bind(fields)
            .bind(&write.record.content_hash)
            .bind(seen_at)
            .execute(&mut *tx)
            .await?;
        }

        if !unchanged.is_empty() {
            sqlx::query(
                r#"
                UPDATE canonical_records
                   SET last_seen_at = $3
                 WHERE job = $1
                   AND remote_id = ANY($2)
                "#,
            )
            .bind(job.as_str())
            .bind(&unchanged)
            .bind(seen_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(%job, writes = writes.len(), touched = unchanged.len(), "batch committed");
        Ok(())
    }

    async fn get(&self, job: JobId, remote_id: &str) -> Result<Option<CanonicalRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT remote_id, fields, content_hash, first_seen_at, last_seen_at
              FROM canonical_records
             WHERE job = $1
               AND remote_id = $2
            "#,
        )
        .bind(job.as_str())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let fields: serde_json::Value = row.try_get("fields")?;
        let fields: Fields = serde_json::from_value(fields)?;
        Ok(Some(CanonicalRecord {
            remote_id: row.try_get("remote_id")?,
            fields,
            content_hash: row.try_get("content_hash")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
        }))
    }

    async fn remote_ids_after(
        &self,
        job: JobId,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT remote_id
              FROM canonical_records
             WHERE job = $1
               AND ($2::text IS NULL OR remote_id > $2)
             ORDER BY remote_id
             LIMIT $3
            "#,
        )
        .bind(job.as_str())
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("remote_id")?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn last_run_at(&self, job: JobId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT last_run_at FROM sync_checkpoints WHERE job = $1")
            .bind(job.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("last_run_at")?)),
            None => Ok(None),
        }
    }

    async fn set_last_run_at(&self, job: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (job, last_run_at)
            VALUES ($1, $2)
            ON CONFLICT (job) DO UPDATE
               SET last_run_at = EXCLUDED.last_run_at
            "#,
        )
        .bind(job.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
