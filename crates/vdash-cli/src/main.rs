use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vdash_sync::{PgAgentStore, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "vdash")]
#[command(about = "VICIdial dashboard bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation and persistence pass, then print its summary.
    Sync,
    /// Apply database migrations to DATABASE_URL.
    Migrate,
    /// Serve the JSON API (and the scheduled sync when enabled).
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vdash=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Sync => {
            let summary = vdash_sync::run_sync_once_from_env().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let store = PgAgentStore::connect(url).await.context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => vdash_web::serve_from_env().await?,
    }

    Ok(())
}
