//! Job runners for the reconciliation pipeline and their wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use recon_adapters::{
    connect_ledger, CrmReservationsSource, ErpContractsSource, LedgerLandValueSource,
    RemoteSource,
};
use recon_core::{MonetaryTextParser, RecordNormalizer};
use recon_storage::{
    CanonicalStore, CheckpointStore, Credentials, HttpClientConfig, HttpFetcher,
    MemoryCanonicalStore, MemoryCheckpointStore, PgCanonicalStore, PgCheckpointStore,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod config;
pub mod orchestrator;
pub mod persister;
pub mod registry;
pub mod scheduler;

pub use config::SyncConfig;
pub use orchestrator::{JobState, SyncError, SyncOrchestrator};
pub use persister::BatchPersister;
pub use registry::{JobRegistry, JobStatus};
pub use scheduler::{build_scheduler, maybe_build_scheduler};

pub const CRATE_NAME: &str = "recon-sync";

/// Canonical store connection; nothing is opened until the first query.
pub fn connect_store(config: &SyncConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy(&config.database_url)
        .context("parsing DATABASE_URL")
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("applying canonical store migrations")
}

/// Registry backed by the Postgres canonical store and checkpoint table.
pub fn build_registry(config: &SyncConfig) -> Result<JobRegistry> {
    let pool = connect_store(config)?;
    let store: Arc<dyn CanonicalStore> = Arc::new(PgCanonicalStore::new(pool.clone()));
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(PgCheckpointStore::new(pool));
    registry_with(config, store, checkpoints)
}

/// Registry over in-process stores, for dry runs. Nothing persists past the process.
pub fn memory_registry(config: &SyncConfig) -> Result<JobRegistry> {
    registry_with(
        config,
        Arc::new(MemoryCanonicalStore::new()),
        Arc::new(MemoryCheckpointStore::new()),
    )
}

pub fn registry_with(
    config: &SyncConfig,
    store: Arc<dyn CanonicalStore>,
    checkpoints: Arc<dyn CheckpointStore>,
) -> Result<JobRegistry> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?;
    let ledger_pool = connect_ledger(&config.ledger).context("parsing LEDGER_DATABASE_URL")?;

    let sources: Vec<Arc<dyn RemoteSource>> = vec![
        Arc::new(CrmReservationsSource::new(
            http.clone(),
            config.crm_base_url.clone(),
            crm_credentials(config),
            config.page_size,
        )),
        Arc::new(ErpContractsSource::new(
            http,
            config.erp_base_url.clone(),
            erp_credentials(config),
            config.page_size,
        )),
        Arc::new(LedgerLandValueSource::new(
            ledger_pool,
            store.clone(),
            &config.ledger,
        )),
    ];

    let persister = BatchPersister::new(store, config.batch_size);
    let mut registry = JobRegistry::new();
    for source in sources {
        registry.register(SyncOrchestrator::new(
            source,
            RecordNormalizer::new(MonetaryTextParser::new(config.monetary.clone())),
            persister.clone(),
            checkpoints.clone(),
            config.delta_lookback,
        ));
    }
    Ok(registry)
}

fn crm_credentials(config: &SyncConfig) -> Credentials {
    match &config.crm_token {
        Some(token) => Credentials::Bearer(token.clone()),
        None => Credentials::None,
    }
}

fn erp_credentials(config: &SyncConfig) -> Credentials {
    match (&config.erp_user, &config.erp_password) {
        (Some(user), Some(password)) => Credentials::Basic {
            user: user.clone(),
            password: password.clone(),
        },
        _ => Credentials::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::JobId;

    #[tokio::test]
    async fn every_job_is_registered_and_idle() {
        let registry = memory_registry(&SyncConfig::from_env()).unwrap();
        let statuses = registry.statuses().await;
        let jobs: Vec<JobId> = statuses.iter().map(|s| s.job).collect();
        assert_eq!(jobs, JobId::ALL.to_vec());
        assert!(statuses.iter().all(|s| s.state == JobState::Idle && s.last_run.is_none()));
    }

    #[test]
    fn erp_needs_both_user_and_password() {
        let mut config = SyncConfig::from_env();
        config.erp_user = Some("erp".into());
        config.erp_password = None;
        assert!(matches!(erp_credentials(&config), Credentials::None));
        config.erp_password = Some("pw".into());
        assert!(matches!(erp_credentials(&config), Credentials::Basic { .. }));
    }
}
