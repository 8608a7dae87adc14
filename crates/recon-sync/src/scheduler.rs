use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::orchestrator::SyncOrchestrator;
use crate::registry::JobRegistry;

/// One cron job per registered sync job, each triggering a delta run.
///
/// A tick that lands while the previous run is still going is dropped; the
/// next tick finds the guard clear.
pub async fn build_scheduler(config: &SyncConfig, registry: &JobRegistry) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for job in registry.jobs() {
        let Some(cron) = config.crons.get(&job) else {
            info!(%job, "no cron configured; job is trigger-only");
            continue;
        };
        let orchestrator = registry.get(job)?.clone();
        let cron_job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move { scheduled_delta(&orchestrator).await })
        })
        .with_context(|| format!("creating scheduler job for {job} with cron {cron}"))?;
        sched.add(cron_job).await.context("adding scheduler job")?;
        info!(%job, %cron, "scheduled delta sync");
    }
    Ok(sched)
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    registry: &JobRegistry,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(config, registry).await.map(Some)
}

async fn scheduled_delta(orchestrator: &Arc<SyncOrchestrator>) {
    let job = orchestrator.job();
    match orchestrator.delta_sync().await {
        Ok(stats) => info!(
            %job,
            run_id = %stats.run_id,
            total = stats.total(),
            failed = stats.failed(),
            "scheduled delta finished"
        ),
        Err(err) if err.is_already_running() => {
            info!(%job, "scheduled tick dropped; previous run still in flight")
        }
        Err(err) => error!(%job, error = %err, "scheduled delta failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_registry;
    use recon_core::JobId;

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_scheduler_builds_nothing() {
        let mut config = SyncConfig::from_env();
        config.scheduler_enabled = false;
        let registry = memory_registry(&config).unwrap();
        assert!(maybe_build_scheduler(&config, &registry).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_is_reported_with_job() {
        let mut config = SyncConfig::from_env();
        config.crons.insert(JobId::ErpContracts, "every hour please".into());
        let registry = memory_registry(&config).unwrap();
        let err = match build_scheduler(&config, &registry).await {
            Ok(_) => panic!("an unparseable cron expression must not schedule"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("erp-contracts"));
    }
}
