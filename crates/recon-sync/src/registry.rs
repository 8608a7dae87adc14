use std::collections::BTreeMap;
use std::sync::Arc;

use recon_core::{JobId, SyncMode, SyncRunStats};
use serde::Serialize;

use crate::orchestrator::{JobState, SyncError, SyncOrchestrator};

/// One orchestrator per job. Jobs never share a guard, so different jobs run concurrently.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<JobId, Arc<SyncOrchestrator>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: JobId,
    pub state: JobState,
    pub last_run: Option<SyncRunStats>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, orchestrator: SyncOrchestrator) -> &mut Self {
        self.jobs.insert(orchestrator.job(), Arc::new(orchestrator));
        self
    }

    pub fn get(&self, job: JobId) -> Result<&Arc<SyncOrchestrator>, SyncError> {
        self.jobs.get(&job).ok_or(SyncError::UnknownJob(job))
    }

    pub fn jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.jobs.keys().copied()
    }

    pub async fn run(&self, job: JobId, mode: SyncMode) -> Result<SyncRunStats, SyncError> {
        self.get(job)?.run(mode).await
    }

    pub async fn full_sync(&self, job: JobId) -> Result<SyncRunStats, SyncError> {
        self.run(job, SyncMode::Full).await
    }

    pub async fn delta_sync(&self, job: JobId) -> Result<SyncRunStats, SyncError> {
        self.run(job, SyncMode::Delta).await
    }

    pub async fn statuses(&self) -> Vec<JobStatus> {
        let mut out = Vec::with_capacity(self.jobs.len());
        for (job, orchestrator) in &self.jobs {
            out.push(JobStatus {
                job: *job,
                state: orchestrator.state(),
                last_run: orchestrator.last_run().await,
            });
        }
        out
    }
}
