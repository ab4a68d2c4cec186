//! Parses a TOML fleet manifest into a roster of `iotswarm_core::Device`s.
//!
//! A swarm has an open-ended device count, so (unlike `node-forwarder`, which
//! has one set of settings per process) a per-device environment variable
//! scheme doesn't fit. Instead the device roster lives in a small on-disk
//! manifest, read with `serde` the way `farmctl` reads its own TOML
//! configuration.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use iotswarm_core::adapter::{Cr1000X, Passthrough, PayloadAdapter};
use iotswarm_core::datasource::{DataSource, LoopingCsv, LoopingSql, Mock as MockSource};
use iotswarm_core::publisher::{Mock as MockPublisher, Mqtt, MqttConfig, Publisher};
use iotswarm_core::{Device, DeviceConfig, DeviceType, Table};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct FleetManifest {
    pub name: Option<String>,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    #[serde(default)]
    pub device_type: DeviceTypeEntry,
    #[serde(default)]
    pub sleep_seconds: u64,
    #[serde(default)]
    pub max_cycles: u64,
    #[serde(default)]
    pub delay_start: bool,
    #[serde(default)]
    pub no_send_probability: u8,
    pub table: Option<String>,
    pub data_source: DataSourceEntry,
    #[serde(default)]
    pub publisher: PublisherEntry,
    pub mqtt_topic: Option<String>,
    pub mqtt_prefix: Option<String>,
    pub mqtt_suffix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTypeEntry {
    #[default]
    Base,
    Cr1000X,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSourceEntry {
    Csv { path: PathBuf },
    Sql { path: PathBuf },
    Mock,
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublisherEntry {
    #[default]
    Mock,
    Mqtt,
}

pub fn load(path: &Path) -> Result<FleetManifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading fleet manifest {}", path.display()))?;
    let manifest: FleetManifest =
        toml::from_str(&raw).with_context(|| format!("parsing fleet manifest {}", path.display()))?;
    if manifest.devices.is_empty() {
        bail!("fleet manifest {} declares no devices", path.display());
    }
    Ok(manifest)
}

/// The three collaborator handles a `Device` needs, independent of its
/// `DeviceConfig` - kept separate so a snapshot resume can rebuild these from
/// the current manifest while the config and cycle come from the snapshot.
#[derive(Clone)]
pub struct DeviceComponents {
    pub data_source: Arc<dyn DataSource>,
    pub publisher: Arc<dyn Publisher>,
    pub adapter: Arc<dyn PayloadAdapter>,
}

/// Builds every device's `DataSource`/`Publisher`/`Adapter`, keyed by
/// `device_id`. Data sources are deduplicated by their construction
/// parameters (same CSV path or SQL path) and publishers by kind, so devices
/// that share a backing store or broker connection share the same handle,
/// rather than opening a redundant one per device.
pub fn build_components(
    manifest: &FleetManifest,
    config: &Config,
) -> Result<HashMap<String, DeviceComponents>> {
    let mut csv_cache: HashMap<PathBuf, Arc<dyn DataSource>> = HashMap::new();
    let mut sql_cache: HashMap<PathBuf, Arc<dyn DataSource>> = HashMap::new();
    let mock_source: Arc<dyn DataSource> = Arc::new(MockSource::new());
    let mock_publisher: Arc<dyn Publisher> = Arc::new(MockPublisher::new());
    let mqtt_publisher = build_mqtt_publisher(config)?;

    let mut components = HashMap::with_capacity(manifest.devices.len());
    for entry in &manifest.devices {
        let data_source: Arc<dyn DataSource> = match &entry.data_source {
            DataSourceEntry::Csv { path } => match csv_cache.get(path) {
                Some(existing) => existing.clone(),
                None => {
                    let loaded: Arc<dyn DataSource> = Arc::new(
                        LoopingCsv::from_path(path)
                            .with_context(|| format!("reading CSV source {}", path.display()))?,
                    );
                    csv_cache.insert(path.clone(), loaded.clone());
                    loaded
                }
            },
            DataSourceEntry::Sql { path } => sql_cache
                .entry(path.clone())
                .or_insert_with(|| Arc::new(LoopingSql::new(path.clone())) as Arc<dyn DataSource>)
                .clone(),
            DataSourceEntry::Mock => mock_source.clone(),
        };

        let publisher: Arc<dyn Publisher> = match entry.publisher {
            PublisherEntry::Mock => mock_publisher.clone(),
            PublisherEntry::Mqtt => mqtt_publisher.clone().with_context(|| {
                format!(
                    "device {}: mqtt publisher requested but not configured",
                    entry.device_id
                )
            })?,
        };

        let adapter: Arc<dyn PayloadAdapter> = match entry.device_type {
            DeviceTypeEntry::Base => Arc::new(Passthrough::new()),
            DeviceTypeEntry::Cr1000X => Arc::new(Cr1000X::new()),
        };

        components.insert(
            entry.device_id.clone(),
            DeviceComponents {
                data_source,
                publisher,
                adapter,
            },
        );
    }

    Ok(components)
}

/// Builds fresh, validated `Device`s straight from the manifest (the
/// non-resume path).
pub fn build_devices(manifest: &FleetManifest, config: &Config) -> Result<Vec<Device>> {
    let mut components = build_components(manifest, config)?;

    let mut devices = Vec::with_capacity(manifest.devices.len());
    for entry in &manifest.devices {
        let table = entry
            .table
            .as_deref()
            .map(Table::parse)
            .transpose()
            .with_context(|| format!("device {}: invalid table", entry.device_id))?;
        let table_required = matches!(entry.data_source, DataSourceEntry::Sql { .. });

        let device_type = match entry.device_type {
            DeviceTypeEntry::Base => DeviceType::Base,
            DeviceTypeEntry::Cr1000X => DeviceType::Cr1000X,
        };

        let device_config = DeviceConfig::new(
            entry.device_id.clone(),
            device_type,
            entry.sleep_seconds,
            entry.max_cycles,
            entry.delay_start,
            entry.no_send_probability,
            table,
            table_required,
            entry.mqtt_topic.clone(),
            entry.mqtt_prefix.clone(),
            entry.mqtt_suffix.clone(),
        )?;

        let parts = components
            .remove(&entry.device_id)
            .expect("built above for every manifest entry");
        devices.push(Device::new(device_config, parts.data_source, parts.publisher, parts.adapter));
    }

    Ok(devices)
}

fn build_mqtt_publisher(config: &Config) -> Result<Option<Arc<dyn Publisher>>> {
    let (Some(endpoint), Some(cert), Some(key), Some(ca)) = (
        &config.mqtt_endpoint,
        &config.mqtt_cert_path,
        &config.mqtt_key_path,
        &config.mqtt_ca_cert_path,
    ) else {
        return Ok(None);
    };

    let mut mqtt_config = MqttConfig::new(endpoint.clone(), config.mqtt_client_id.clone(), cert, key, ca);
    mqtt_config.port = config.mqtt_port;
    Ok(Some(Arc::new(Mqtt::new(mqtt_config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_mqtt_config(fleet_path: PathBuf) -> Config {
        Config {
            fleet_path,
            snapshot_dir: None,
            mqtt_endpoint: None,
            mqtt_cert_path: None,
            mqtt_key_path: None,
            mqtt_ca_cert_path: None,
            mqtt_client_id: "test-client".to_string(),
            mqtt_port: None,
        }
    }

    fn write_manifest(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn parses_a_two_device_manifest() {
        let (_dir, path) = write_manifest(
            r#"
            name = "demo-swarm"

            [[device]]
            device_id = "ALIC1"
            device_type = "base"
            sleep_seconds = 5
            max_cycles = 0
            delay_start = true

            [device.data_source]
            kind = "csv"
            path = "demos/soilmet.csv"

            [device.publisher]
            kind = "mock"

            [[device]]
            device_id = "MORLY"
            device_type = "cr1000_x"
            max_cycles = 20

            [device.data_source]
            kind = "mock"
            "#,
        );

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("demo-swarm"));
        assert_eq!(manifest.devices.len(), 2);
        assert_eq!(manifest.devices[0].device_id, "ALIC1");
        assert!(matches!(manifest.devices[0].device_type, DeviceTypeEntry::Base));
        assert!(matches!(manifest.devices[1].device_type, DeviceTypeEntry::Cr1000X));
    }

    #[test]
    fn rejects_a_manifest_with_no_devices() {
        let (_dir, path) = write_manifest("name = \"empty\"\n");
        assert!(load(&path).is_err());
    }

    #[tokio::test]
    async fn build_devices_wires_mock_collaborators_for_each_entry() {
        let (_dir, path) = write_manifest(
            r#"
            [[device]]
            device_id = "ALIC1"
            device_type = "base"

            [device.data_source]
            kind = "mock"

            [device.publisher]
            kind = "mock"

            [[device]]
            device_id = "MORLY"
            device_type = "base"
            max_cycles = 3

            [device.data_source]
            kind = "mock"
            "#,
        );
        let manifest = load(&path).unwrap();
        let config = no_mqtt_config(path.clone());

        let devices = build_devices(&manifest, &config).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].config().device_id, "ALIC1");
        assert_eq!(devices[1].config().max_cycles, 3);
    }

    #[test]
    fn mqtt_publisher_requires_full_connection_config() {
        let (_dir, path) = write_manifest("");
        let config = no_mqtt_config(path);
        assert!(build_mqtt_publisher(&config).unwrap().is_none());
    }
}
