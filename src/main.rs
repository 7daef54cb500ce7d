use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bddhub::config::AppConfig;
use bddhub::metrics::Metrics;
use bddhub::notify::mailer::HttpMailer;
use bddhub::notify::Notifier;
use bddhub::storage::{self, Store};

#[derive(Parser)]
#[command(
    name = "bddhub",
    about = "Scenario authoring and test-run tracking for BDD suites",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (REST API + HTML UI)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path, overrides the config file
        #[arg(long)]
        db: Option<String>,
    },

    /// Send the result email for a finished run
    Notify {
        /// Run id to report on
        #[arg(long)]
        run_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(db) = db {
                config.db_path = db;
            }
            tracing::info!(bind = %config.bind, "starting bddhub server");
            bddhub::serve(&config).await?;
        }
        Commands::Notify { run_id } => {
            tracing::info!(run_id, "sending result email");
            let pool = storage::open_pool(&config.db_path)?;
            let store = Store::new(pool.clone());
            let metrics = Metrics::new(pool);
            let mailer = Box::new(HttpMailer::new(&config.email.endpoint));
            let notifier = Notifier::new(
                store,
                metrics,
                mailer,
                config.email.clone(),
                &config.root_url,
            );
            notifier.notify(run_id).await?;
        }
    }

    Ok(())
}
