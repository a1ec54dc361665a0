// Users CRUD service with Idempotency-Key enforcement on POST and PATCH.

mod error;
mod repository;
mod routes;
mod users;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

use idempotency::{build_engine, CliArgs, Config};
use repository::InMemoryUserRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();

    // CLI > env > file > defaults
    let config = Config::load(&cli_args).context("failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        store_backend = ?config.store_backend,
        retention_secs = config.retention.as_secs(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "Users API starting"
    );

    let engine = build_engine(&config)
        .await
        .context("failed to initialise idempotency store")?;
    let app = routes::router(Arc::new(InMemoryUserRepository::new()), engine);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("Users API listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
