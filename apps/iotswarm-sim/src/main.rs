mod config;
mod fleet;

use crate::config::Config;
use anyhow::{Context, Result};
use iotswarm_core::swarm::Swarm;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,iotswarm_sim=info,iotswarm_core=info".into());
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

    let manifest = fleet::load(&config.fleet_path)?;
    let base_dir = match &config.snapshot_dir {
        Some(dir) => dir.clone(),
        None => Swarm::default_base_dir().context("resolving default snapshot directory")?,
    };

    let swarm_name = manifest.name.clone();
    let resuming = swarm_name
        .as_deref()
        .map(|name| Swarm::exists(name, &base_dir))
        .unwrap_or(false);

    let swarm = if resuming {
        let name = swarm_name.clone().expect("resuming implies a named swarm");
        tracing::info!(swarm = %name, "resuming from existing snapshot");
        let mut components = fleet::build_components(&manifest, &config)?;
        Swarm::load(&name, &base_dir, move |restored_config, cycle| {
            let parts = components.remove(&restored_config.device_id).unwrap_or_else(|| {
                panic!(
                    "snapshot references device {} not present in the current fleet manifest",
                    restored_config.device_id
                )
            });
            iotswarm_core::device::Device::resume(
                restored_config,
                cycle,
                parts.data_source,
                parts.publisher,
                parts.adapter,
            )
        })
        .context("loading swarm snapshot")?
    } else {
        let devices = fleet::build_devices(&manifest, &config)?;
        Swarm::new(devices, swarm_name, &base_dir).context("building swarm")?
    };

    tracing::info!(swarm = %swarm.name(), devices = swarm.devices().len(), "starting swarm");

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            run_cancel.cancel();
        }
    });

    match swarm.run(cancel).await {
        Ok(()) => {
            tracing::info!(swarm = %swarm.name(), "swarm completed");
            Ok(())
        }
        Err(iotswarm_core::error::DeviceError::Cancelled) => {
            tracing::info!(swarm = %swarm.name(), "swarm stopped by signal");
            Ok(())
        }
        Err(err) => Err(err).context("swarm run failed"),
    }
}
