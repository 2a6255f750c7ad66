use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model_dir = %config.model_dir.display(),
        "facecheckd starting"
    );

    server::run(config).await
}
