mod config;
mod postgres_source;

use crate::config::Config;
use anyhow::{Context, Result};
use iotswarm_core::liveupload::{HighWaterMarkStore, LiveUploader, LocalObjectStore};
use postgres_source::PostgresSource;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,iotswarm_liveupload=info,iotswarm_core=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let state_path = HighWaterMarkStore::default_path(&config.app_name, &config.table.name().to_lowercase())
        .context("resolving high-water-mark state path")?;
    let state = HighWaterMarkStore::load(&state_path).context("loading high-water-mark state")?;

    let source = PostgresSource::connect(&config.db_dsn).await?;
    let store = LocalObjectStore::new(config.object_store_root.clone());

    let mut uploader = LiveUploader::new(
        config.table,
        config.sites.clone(),
        source,
        store,
        config.key_prefix.clone(),
        state,
    )
    .with_fallback(chrono::Duration::hours(config.fallback_hours));

    tracing::info!(
        table = %config.table,
        sites = config.sites.len(),
        interval_secs = config.poll_interval.as_secs(),
        "starting live-upload loop"
    );

    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match uploader.run_once().await {
                    Ok(written) => {
                        if written > 0 {
                            tracing::info!(written, "uploaded new rows");
                        }
                    }
                    Err(err) => tracing::error!(error = %err, "live-upload pass failed"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("listening for shutdown signal")?;
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
