//! Per-job run loop: fetch pages, normalize, classify, persist in batches.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recon_adapters::{AdapterContext, FetchFilter, RemoteFetcher, RemoteSource, SourceError};
use recon_core::{JobId, RecordNormalizer, RunCounts, SyncMode, SyncRunStats};
use recon_storage::{CheckpointStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::persister::BatchPersister;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run of the same job is in flight. Not a job failure.
    #[error("{job} sync is already running")]
    AlreadyRunning { job: JobId },
    #[error("{job} fetch failed: {source}")]
    Fetch {
        job: JobId,
        #[source]
        source: SourceError,
    },
    #[error("reading {job} checkpoint failed: {source}")]
    Checkpoint {
        job: JobId,
        #[source]
        source: StoreError,
    },
    #[error("no job registered for {0}")]
    UnknownJob(JobId),
}

impl SyncError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, SyncError::AlreadyRunning { .. })
    }
}

/// `Completed` and `Failed` are resting states like `Idle`; they only remember
/// how the previous run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => JobState::Running,
            2 => JobState::Completed,
            3 => JobState::Failed,
            _ => JobState::Idle,
        }
    }
}

/// Holds the job in `Running`; dropping it (including on panic) releases the job.
struct RunGuard<'a> {
    state: &'a AtomicU8,
    outcome: JobState,
}

impl RunGuard<'_> {
    fn complete(&mut self) {
        self.outcome = JobState::Completed;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.store(self.outcome as u8, Ordering::Release);
    }
}

pub struct SyncOrchestrator {
    job: JobId,
    source: Arc<dyn RemoteSource>,
    normalizer: RecordNormalizer,
    persister: BatchPersister,
    checkpoints: Arc<dyn CheckpointStore>,
    default_lookback: Duration,
    state: AtomicU8,
    last_run: Mutex<Option<SyncRunStats>>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        normalizer: RecordNormalizer,
        persister: BatchPersister,
        checkpoints: Arc<dyn CheckpointStore>,
        default_lookback: Duration,
    ) -> Self {
        Self {
            job: source.job(),
            source,
            normalizer,
            persister,
            checkpoints,
            default_lookback,
            state: AtomicU8::new(JobState::Idle as u8),
            last_run: Mutex::new(None),
        }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub async fn last_run(&self) -> Option<SyncRunStats> {
        self.last_run.lock().await.clone()
    }

    pub async fn full_sync(&self) -> Result<SyncRunStats, SyncError> {
        self.run(SyncMode::Full).await
    }

    pub async fn delta_sync(&self) -> Result<SyncRunStats, SyncError> {
        self.run(SyncMode::Delta).await
    }

    /// Runs the job once, or returns `AlreadyRunning` immediately if it is in flight.
    pub async fn run(&self, mode: SyncMode) -> Result<SyncRunStats, SyncError> {
        let Some(mut guard) = self.try_begin() else {
            info!(job = %self.job, %mode, "trigger rejected; run already in flight");
            return Err(SyncError::AlreadyRunning { job: self.job });
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", job = %self.job, %mode, %run_id);
        let result = self.execute(run_id, mode).instrument(span).await;
        if let Ok(stats) = &result {
            *self.last_run.lock().await = Some(stats.clone());
            guard.complete();
        }
        result
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == JobState::Running as u8 {
                return None;
            }
            match self.state.compare_exchange(
                current,
                JobState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(RunGuard {
                        state: &self.state,
                        outcome: JobState::Failed,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    async fn execute(&self, run_id: Uuid, mode: SyncMode) -> Result<SyncRunStats, SyncError> {
        let job = self.job;
        let started_at = Utc::now();

        let checkpoint = match mode {
            SyncMode::Full => None,
            SyncMode::Delta => self
                .checkpoints
                .last_run_at(job)
                .await
                .map_err(|source| SyncError::Checkpoint { job, source })?,
        };
        let filter = FetchFilter::resolve(mode, checkpoint, self.default_lookback, started_at);
        info!(since = ?filter.since, "run started");

        let ctx = AdapterContext { run_id, started_at };
        let mut fetcher = RemoteFetcher::new(self.source.as_ref(), ctx, filter);
        let batch_size = self.persister.batch_size();
        let mut counts = RunCounts::default();
        let mut buffer = Vec::with_capacity(batch_size);

        loop {
            let page = match fetcher.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(source) => {
                    error!(
                        pages = fetcher.pages_fetched(),
                        persisted = counts.total,
                        error = %source,
                        "fetch failed; aborting run"
                    );
                    return Err(SyncError::Fetch { job, source });
                }
            };

            if !page.unreadable.is_empty() {
                warn!(count = page.unreadable.len(), "remote records unreadable; counted as failed");
                counts.record_failed(page.unreadable.len());
            }

            for raw in &page.records {
                buffer.push(self.normalizer.normalize(raw));
                if buffer.len() >= batch_size {
                    let batch = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                    counts.merge(self.persister.persist(job, batch, started_at).await);
                }
            }
        }
        if !buffer.is_empty() {
            counts.merge(self.persister.persist(job, buffer, started_at).await);
        }

        self.advance_checkpoint(started_at).await;

        let stats = SyncRunStats {
            run_id,
            job,
            mode,
            started_at,
            finished_at: Utc::now(),
            counts,
        };
        info!(
            pages = fetcher.pages_fetched(),
            total = stats.total(),
            created = stats.created(),
            updated = stats.updated(),
            unchanged = stats.unchanged(),
            failed = stats.failed(),
            "run finished"
        );
        Ok(stats)
    }

    async fn advance_checkpoint(&self, at: DateTime<Utc>) {
        if let Err(err) = self.checkpoints.set_last_run_at(self.job, at).await {
            warn!(error = %err, "checkpoint not advanced; next delta will widen its window");
        }
    }
}
