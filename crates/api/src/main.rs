mod error;
mod routes;
mod settings;

use anyhow::{Context, Result};
use pipeline::Pipeline;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    let config = settings.load_pipeline_config()?;
    let services = settings.connect(&config).await?;
    let pipeline = Arc::new(Pipeline::new(config, services)?);

    let app = routes::router(pipeline);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;

    tracing::info!(addr = %settings.bind_addr, "Server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
