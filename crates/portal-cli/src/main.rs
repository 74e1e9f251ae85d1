use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use portal_core::{FullSyncConfig, JobPriority, SyncType};
use portal_storage::PgContentStore;
use portal_sync::{build_scheduler, PortalConfig, SyncServices};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "portal-cli")]
#[command(about = "Content portal sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Priority {
    Low,
    Normal,
    High,
}

impl From<Priority> for JobPriority {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Low => JobPriority::Low,
            Priority::Normal => JobPriority::Normal,
            Priority::High => JobPriority::High,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One regular sync pass: news, video or combined.
    Sync {
        #[arg(default_value = "combined")]
        sync_type: String,
    },
    /// Run a full sync job in the foreground and print its final record.
    FullSync {
        #[arg(long, default_value_t = 50)]
        batch_size: u32,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        #[arg(long)]
        include_analytics: bool,
        #[arg(long)]
        force_refresh: bool,
        #[arg(long)]
        webhook: Option<String>,
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
    },
    Cleanup,
    /// HTTP API plus the cron scheduler when enabled.
    Serve,
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PortalConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        sync_type: "combined".into(),
    }) {
        Commands::Sync { sync_type } => {
            let sync_type: SyncType = sync_type.parse()?;
            let services = SyncServices::from_config(config).await?;
            let run = services.orchestrator.start(sync_type).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::FullSync {
            batch_size,
            max_retries,
            include_analytics,
            force_refresh,
            webhook,
            priority,
        } => {
            let services = SyncServices::from_config(config).await?;
            let job_id = services
                .full_sync
                .start_full_sync(FullSyncConfig {
                    batch_size,
                    max_retries,
                    include_analytics,
                    force_refresh,
                    webhook,
                    priority: priority.into(),
                })
                .await?;
            info!(%job_id, "full sync started");
            let job = loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let job = services.full_sync.get_job(job_id).await?;
                if job.status.is_terminal() {
                    break job;
                }
                info!(
                    batches = job.progress.batches_completed,
                    of = job.progress.batches_total,
                    percent = format!("{:.0}", job.progress.percent()),
                    "full sync progress"
                );
            };
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Cleanup => {
            let services = SyncServices::from_config(config).await?;
            let report = services.cleanup.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve => {
            let services = Arc::new(SyncServices::from_config(config).await?);
            if let Some(sched) = build_scheduler(services.clone()).await? {
                sched.start().await.context("starting scheduler")?;
            }
            portal_web::serve(services).await?;
        }
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgContentStore::connect(url, 1).await?;
            store.migrate().await?;
            info!("migrations applied");
        }
    }

    Ok(())
}
