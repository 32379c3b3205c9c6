//! opencel — self-hosted continuous deployment platform.
//!
//! Listens for source-control push events, builds a container image from the
//! pushed commit, runs it behind a routing reverse proxy with a deterministic
//! preview URL, and promotes builds to a project-wide production hostname.
//!
//! One binary, three long-lived processes: `api` (HTTP + webhook intake),
//! `worker` (build pipeline), `agent` (host-level admin jobs).

mod agent;
mod config;
mod db;
mod envcrypt;
mod github;
mod metrics;
mod migration;
mod models;
mod queue;
mod routes;
mod schema;
mod services;
mod settings;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db::DbPool;
use crate::github::GitHubAppProvider;
use crate::models::task::QueueTask;
use crate::queue::BuildDeployPayload;
use crate::services::builder::Builder;
use crate::settings::SettingsStore;

/// Bounded build parallelism per worker process.
const BUILD_CONCURRENCY: usize = 2;

#[derive(Parser)]
#[command(name = "opencel", about = "Self-hosted continuous deployment platform")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Api,
    /// Run the build worker.
    Worker,
    /// Run the on-host agent (admin jobs).
    Agent,
    /// Apply database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = db::connect(&config.dsn)?;

    match cli.command {
        Command::Api => run_api(config, pool).await,
        Command::Worker => run_worker(config, pool).await,
        Command::Agent => run_agent(config, pool).await,
        Command::Migrate => {
            let mut conn = pool.get().await?;
            migration::run_migration(&mut conn).await?;
            tracing::info!("Migrations applied");
            Ok(())
        }
    }
}

async fn run_api(config: Config, pool: DbPool) -> anyhow::Result<()> {
    tracing::info!("Starting opencel API...");

    {
        let mut conn = pool.get().await?;
        tracing::info!("Running database migrations...");
        migration::run_migration(&mut conn).await?;
        services::setup_service::bootstrap_from_env(
            &mut conn,
            &config.bootstrap_email,
            &config.bootstrap_password,
        )
        .await?;
    }

    let settings = SettingsStore::new(pool.clone(), config.encrypt_key.clone());
    let github = Arc::new(GitHubAppProvider::new(config.clone(), settings.clone()));

    metrics::init_metrics();

    let state = routes::AppState {
        pool,
        config: config.clone(),
        settings,
        github,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("opencel API listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_worker(config: Config, pool: DbPool) -> anyhow::Result<()> {
    tracing::info!("Starting opencel worker...");

    let settings = SettingsStore::new(pool.clone(), config.encrypt_key.clone());
    let github = Arc::new(GitHubAppProvider::new(config.clone(), settings));
    let builder = Arc::new(Builder::new(pool.clone(), config, github));

    metrics::init_metrics();

    let handler = move |task: QueueTask| {
        let builder = builder.clone();
        async move {
            match task.kind.as_str() {
                queue::TASK_BUILD_DEPLOY => {
                    let payload: BuildDeployPayload = serde_json::from_value(task.payload)?;
                    builder.build(payload.deployment_id).await
                }
                other => anyhow::bail!("unknown build task kind: {other}"),
            }
        }
    };

    tokio::select! {
        _ = queue::run_consumer(pool, queue::QUEUE_BUILDS, BUILD_CONCURRENCY, handler) => {}
        _ = shutdown_signal() => {
            tracing::info!("Worker shutting down");
        }
    }
    Ok(())
}

async fn run_agent(config: Config, pool: DbPool) -> anyhow::Result<()> {
    tracing::info!("Starting opencel agent...");

    let settings = SettingsStore::new(pool.clone(), config.encrypt_key.clone());

    tokio::select! {
        _ = agent::run(pool, settings) => {}
        _ = shutdown_signal() => {
            tracing::info!("Agent shutting down");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
