//! Chatdesk maintenance tool.
//!
//! # Usage
//!
//! ```bash
//! chatdesk-maintenance seed
//! chatdesk-maintenance repair-captions [--batch-size N]
//! chatdesk-maintenance backfill-usernames [--batch-size N]
//! ```
//!
//! Every command is idempotent. Row-level failures are reported in the
//! summary line; the exit status is non-zero only when storage cannot be
//! reached.

use chatdesk_service::bootstrap;
use chatdesk_service::config::MaintenanceConfig;
use chatdesk_service::maintenance::{CaptionRepair, MaintenanceJob, UsernameBackfill};
use chatdesk_service::repositories::{ChatStore, PgChatStore};
use chatdesk_service::services::MediaValidator;
use clap::{Parser, Subcommand};
use common::secret::ExposeSecret;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Maintenance jobs for the Chatdesk store.
#[derive(Parser)]
#[command(name = "chatdesk-maintenance")]
#[command(about = "Seed and repair the Chatdesk store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the default tenant and administrator exist.
    Seed,

    /// Clear media captions that only repeat the media type.
    #[command(name = "repair-captions")]
    RepairCaptions {
        /// Rows per batch (default: CHATDESK_REPAIR_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<u32>,
    },

    /// Assign usernames to identities that have none.
    #[command(name = "backfill-usernames")]
    BackfillUsernames {
        /// Rows per batch (default: CHATDESK_REPAIR_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match MaintenanceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("chatdesk_service={}", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store: Arc<dyn ChatStore> = match PgChatStore::connect(&config.database).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let batch_size = config.content.repair_batch_size;
    let job: Box<dyn MaintenanceJob> = match cli.command {
        Commands::Seed => return seed(store, &config).await,
        Commands::RepairCaptions { batch_size: size } => Box::new(CaptionRepair::new(
            Arc::new(MediaValidator::new(
                config.content.blocked_placeholders.iter(),
            )),
            size.unwrap_or(batch_size),
        )),
        Commands::BackfillUsernames { batch_size: size } => {
            Box::new(UsernameBackfill::new(size.unwrap_or(batch_size)))
        }
    };

    info!(job = job.name(), version = job.version(), "Running maintenance job");
    match job.run(store).await {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(job = job.name(), error = %e, "Maintenance job aborted");
            ExitCode::FAILURE
        }
    }
}

async fn seed(store: Arc<dyn ChatStore>, config: &MaintenanceConfig) -> ExitCode {
    match bootstrap::ensure_defaults(store, &config.seed).await {
        Ok(outcome) => {
            println!(
                "seed: tenant={} admin={} membership_primary={}",
                outcome.tenant.id, outcome.admin.identity_id, outcome.membership.is_primary
            );
            if let Some(password) = &outcome.generated_password {
                println!(
                    "Generated credential for '{}': {}",
                    config.seed.admin_username,
                    password.expose_secret()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Seed failed");
            ExitCode::FAILURE
        }
    }
}
