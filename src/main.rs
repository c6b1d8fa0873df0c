mod api;
mod auth;
mod config;
mod crypto;
mod db;
mod http;
mod issues;
mod jellyfin;
mod jellyseerr;
mod jobs;
mod models;
mod sync;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Configuration;
use crypto::CredentialCipher;
use db::Database;
use http::HttpClient;
use std::sync::Arc;
use sync::{HttpConnector, SyncGate, SyncOrchestrator};
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the API server and the daily sync (default)
    Serve,
    /// Sync every configured user once, then exit
    Sync,
    /// Print a fresh base64 encryption key for `security.encryptionKey`
    GenerateKey,
}

/// Everything both `serve` and `sync` need.
struct Runtime {
    db: Database,
    gate: SyncGate,
    cipher: CredentialCipher,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::GenerateKey => {
            println!("{}", CredentialCipher::generate_key());
            Ok(())
        }
        Command::Sync => {
            let (_, runtime) = start(&cli.config).await?;
            let summary = runtime.gate.run_scheduled().await?;
            info!(
                "Synced {} users: {} succeeded, {} failed, {} skipped",
                summary.users, summary.succeeded, summary.failed, summary.skipped
            );
            Ok(())
        }
        Command::Serve => {
            let (config, runtime) = start(&cli.config).await?;
            serve(config, runtime).await
        }
    }
}

async fn start(config_path: &str) -> Result<(Arc<Configuration>, Runtime)> {
    info!("Starting Media Janitor v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Configuration::from_file(config_path)?);
    info!("Configuration loaded from: {}", config_path);

    let cipher = CredentialCipher::from_base64_key(config.encryption_key()?)
        .context("security.encryptionKey is not a valid key")?;

    let db = Database::connect(&config.database_url(), config.database.max_connections).await?;
    db.migrate().await?;

    let interrupted = db.sync_state().reset_stale().await?;
    if interrupted > 0 {
        warn!("Reset {} syncs left running by a previous process", interrupted);
    }

    let http_client = HttpClient::new(config.request_timeout())?;
    let connector = HttpConnector::new(http_client, config.sync.page_size);
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        Arc::new(connector),
        cipher.clone(),
        config.fetch_timeout(),
        config.sync.prune_missing,
    );
    let gate = SyncGate::new(orchestrator, config.manual_cooldown());

    Ok((config, Runtime { db, gate, cipher }))
}

async fn serve(config: Arc<Configuration>, runtime: Runtime) -> Result<()> {
    let tokens = auth::TokenKeys::new(config.jwt_secret()?, config.token_lifetime());

    let mut scheduler = jobs::start_scheduler(runtime.gate.clone(), &config.sync.schedule).await?;

    let state = api::AppState {
        db: runtime.db,
        gate: runtime.gate,
        cipher: runtime.cipher,
        tokens,
        bcrypt_cost: config.bcrypt_cost(),
    };
    let app = api::build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
