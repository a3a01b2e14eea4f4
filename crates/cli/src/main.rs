//! vdcmig CLI - operator tooling for migration checkpoints and address pools

mod commands;
mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::Table;
use vdcmig_core::application::AsyncTaskPoller;
use vdcmig_core::port::time_provider::SystemTimeProvider;
use vdcmig_core::port::RemoteCall;
use vdcmig_infra_rest::{RestConfig, RestRemoteCall};
use vdcmig_infra_sqlite::{create_pool, run_migrations, SqliteCheckpointStore};

use config::{resolve_db_path, TuningArgs, DEFAULT_DB_PATH};
use logging::{init_tracing, LogFormat};

#[derive(Parser)]
#[command(name = "vdcmig")]
#[command(about = "Virtual datacenter network migration tooling", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Checkpoint database path
    #[arg(long, env = "VDCMIG_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Console log format
    #[arg(long, env = "VDCMIG_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Also write daily-rolling JSON logs into this directory
    #[arg(long, env = "VDCMIG_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(flatten)]
    tuning: TuningArgs,
}

/// Management API endpoint and credentials
#[derive(Debug, Args)]
struct ApiArgs {
    /// Base URL of the management API
    #[arg(long, env = "VDCMIG_API_URL")]
    api_url: String,

    #[arg(long, env = "VDCMIG_API_USER")]
    api_user: String,

    #[arg(long, env = "VDCMIG_API_PASSWORD", hide_env_values = true)]
    api_password: String,

    /// API version sent in the Accept header
    #[arg(long, env = "VDCMIG_API_VERSION")]
    api_version: Option<String>,
}

impl ApiArgs {
    fn connect(&self) -> Result<RestRemoteCall> {
        let mut config = RestConfig::new(&self.api_url, &self.api_user, &self.api_password);
        config.api_version = self.api_version.clone();
        RestRemoteCall::new(config).context("Failed to build API client")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show checkpoint progress per unit
    Status {
        /// Only this unit
        #[arg(short, long)]
        unit: Option<String>,

        /// Pipeline step names in order (comma-separated) to show the next step
        #[arg(short, long)]
        steps: Vec<String>,
    },

    /// Print one unit's full checkpoint record as JSON
    Show {
        unit: String,
    },

    /// Clear a step's completion flag so the next run repeats it
    Reset {
        unit: String,
        step: String,
    },

    /// Delete a unit's checkpoint entirely
    Forget {
        unit: String,
    },

    /// Split an address range around excluded addresses
    SplitRange {
        /// Range as `first-last` or a single address
        range: String,

        /// Addresses to exclude (comma-separated, repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Verify API credentials by opening a session
    CheckAuth {
        #[command(flatten)]
        api: ApiArgs,
    },

    /// Poll an async task until it finishes
    WaitTask {
        /// Task href returned by the API
        href: String,

        /// Give up after this many seconds (defaults to --task-timeout-secs)
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        api: ApiArgs,
    },

    /// Print the effective orchestrator settings
    Config,
}

async fn open_store(raw_path: &str) -> Result<SqliteCheckpointStore> {
    let path = resolve_db_path(raw_path)?;
    let url = path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;
    let pool = create_pool(url)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    run_migrations(&pool).await.context("Failed to run migrations")?;
    Ok(SqliteCheckpointStore::new(pool))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_format, cli.log_dir.as_deref())?;
    let settings = cli.tuning.to_config()?;

    match cli.command {
        Commands::Status { unit, steps } => {
            let store = open_store(&cli.db_path).await?;
            let rows = commands::status(&store, unit.as_deref(), &steps).await?;
            if rows.is_empty() {
                println!("{}", "No checkpoints recorded".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Show { unit } => {
            let store = open_store(&cli.db_path).await?;
            println!("{}", commands::show(&store, &unit).await?);
        }

        Commands::Reset { unit, step } => {
            let store = open_store(&cli.db_path).await?;
            if commands::reset(&store, &SystemTimeProvider, &unit, &step).await? {
                println!("{}", format!("✓ {} will run again for {}", step, unit).green().bold());
            } else {
                println!("{}", format!("○ {} was not completed for {}", step, unit).yellow());
            }
        }

        Commands::Forget { unit } => {
            let store = open_store(&cli.db_path).await?;
            if commands::forget(&store, &unit).await? {
                println!("{}", format!("✓ Checkpoint for {} deleted", unit).green().bold());
            } else {
                println!("{}", format!("○ No checkpoint for {}", unit).yellow());
            }
        }

        Commands::SplitRange { range, exclude } => {
            let parts = commands::split_range(&range, &exclude)?;
            if parts.is_empty() {
                println!("{}", "Nothing left after exclusions".yellow());
            }
            for part in parts {
                println!("{}", part);
            }
        }

        Commands::CheckAuth { api } => {
            let remote = api.connect()?;
            match remote.reauthenticate().await {
                Ok(()) => println!("{} {}", "✓ Session opened at".green().bold(), api.api_url),
                Err(e) => {
                    println!("  {} {}", "✗".red(), e);
                    anyhow::bail!("Authentication failed");
                }
            }
        }

        Commands::WaitTask { href, timeout, api } => {
            let remote: Arc<dyn RemoteCall> = Arc::new(api.connect()?);
            remote.reauthenticate().await.context("Failed to open session")?;
            let poller = AsyncTaskPoller::from_config(remote, &settings);
            let timeout = timeout.map(Duration::from_secs).unwrap_or(settings.task_timeout);

            let task = commands::wait_task(&poller, &href, timeout).await?;
            println!(
                "{}",
                format!("✓ Task {} finished: {} after {} polls", href, task.state, task.polls)
                    .green()
                    .bold()
            );
        }

        Commands::Config => {
            println!("{}", "Effective Settings".cyan().bold());
            println!();
            println!("  {} {}", "Database:".bold(), config::expand_db_path(&cli.db_path).display());
            println!("  {} {:?}", "Poll interval:".bold(), settings.poll_interval);
            println!("  {} {:?}", "Task timeout:".bold(), settings.task_timeout);
            println!("  {} {:?}", "Lock timeout:".bold(), settings.lock_timeout);
            println!("  {} {}", "Batch width:".bold(), settings.batch_width);
        }
    }

    Ok(())
}
