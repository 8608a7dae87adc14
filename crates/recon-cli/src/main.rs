use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recon_core::{JobId, SyncMode};
use recon_sync::{JobRegistry, SyncConfig};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "recon-cli")]
#[command(about = "External-system reconciliation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync now. Without --job every registered job runs in turn.
    Sync {
        #[arg(long)]
        job: Option<JobId>,
        #[arg(long, default_value = "delta")]
        mode: SyncMode,
        /// Reconcile into in-process stores; nothing is written to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply canonical store migrations.
    Migrate,
    /// Serve the HTTP trigger surface, plus the cron scheduler when enabled.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run only the cron scheduler until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = SyncConfig::load()?;

    match cli.command.unwrap_or(Commands::Sync {
        job: None,
        mode: SyncMode::Delta,
        dry_run: false,
    }) {
        Commands::Sync { job, mode, dry_run } => {
            let registry = if dry_run {
                recon_sync::memory_registry(&config)?
            } else {
                recon_sync::build_registry(&config)?
            };
            run_sync(&registry, job, mode).await?;
        }
        Commands::Migrate => {
            let pool = recon_sync::connect_store(&config)?;
            recon_sync::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::Serve { port } => {
            let registry = recon_sync::build_registry(&config)?;
            let scheduler = recon_sync::maybe_build_scheduler(&config, &registry).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
            }
            let state = recon_web::AppState::new(registry);
            recon_web::serve(state, port.unwrap_or_else(recon_web::port_from_env)).await?;
        }
        Commands::Schedule => {
            let registry = recon_sync::build_registry(&config)?;
            let mut sched = recon_sync::build_scheduler(&config, &registry).await?;
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

async fn run_sync(registry: &JobRegistry, job: Option<JobId>, mode: SyncMode) -> Result<()> {
    let jobs: Vec<JobId> = match job {
        Some(job) => vec![job],
        None => registry.jobs().collect(),
    };

    let mut failures = 0usize;
    for job in jobs {
        match registry.run(job, mode).await {
            Ok(stats) => println!("{}", serde_json::to_string(&stats)?),
            Err(err) => {
                error!(%job, error = %err, "sync failed");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} job(s) failed");
    }
    Ok(())
}

/// `RUST_LOG` style filtering; `RECON_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RECON_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }
    Ok(())
}
