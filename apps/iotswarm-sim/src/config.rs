//! Environment-driven configuration for the simulator binary. The core engine
//! (`iotswarm-core`) consults no environment variables itself - only this module
//! does, following `node-forwarder/src/config.rs`'s `env_string`/`env_u64`
//! helpers.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the TOML fleet manifest declaring the swarm's devices.
    pub fleet_path: PathBuf,
    /// Overrides the default `<user-data-dir>/iotswarm/swarms/` snapshot
    /// directory; mainly used by tests to stay hermetic.
    pub snapshot_dir: Option<PathBuf>,

    pub mqtt_endpoint: Option<String>,
    pub mqtt_cert_path: Option<PathBuf>,
    pub mqtt_key_path: Option<PathBuf>,
    pub mqtt_ca_cert_path: Option<PathBuf>,
    pub mqtt_client_id: String,
    pub mqtt_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let fleet_path = PathBuf::from(env_string("IOTSWARM_FLEET_PATH", Some("fleet.toml".to_string()))?);
        let snapshot_dir = env_optional("IOTSWARM_SNAPSHOT_DIR").map(PathBuf::from);

        let mqtt_endpoint = env_optional("IOT_SWARM_MQTT_ENDPOINT");
        let mqtt_cert_path = env_optional("IOT_SWARM_MQTT_CERT_PATH").map(PathBuf::from);
        let mqtt_key_path = env_optional("IOT_SWARM_MQTT_KEY_PATH").map(PathBuf::from);
        let mqtt_ca_cert_path = env_optional("IOT_SWARM_MQTT_CA_CERT_PATH").map(PathBuf::from);
        let mqtt_client_id = env_string(
            "IOT_SWARM_MQTT_CLIENT_ID",
            Some(format!("iotswarm-sim-{}", uuid::Uuid::new_v4())),
        )?;
        let mqtt_port = match env_optional("IOT_SWARM_MQTT_PORT") {
            Some(raw) => Some(raw.trim().parse::<u16>().context("invalid IOT_SWARM_MQTT_PORT")?),
            None => None,
        };

        Ok(Self {
            fleet_path,
            snapshot_dir,
            mqtt_endpoint,
            mqtt_cert_path,
            mqtt_key_path,
            mqtt_ca_cert_path,
            mqtt_client_id,
            mqtt_port,
        })
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
