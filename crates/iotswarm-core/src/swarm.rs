//! Supervisor that owns an ordered collection of [`Device`]s, runs them all
//! concurrently, and snapshots itself after every successful publish.

use crate::config::DeviceConfig;
use crate::device::{Device, DeviceView, SnapshotRequester};
use crate::error::{ConfigError, DeviceError, SnapshotError};
use crate::snapshot::{self, DeviceSnapshot, SwarmSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Supervises a non-empty, ordered collection of devices. Owns no per-device
/// lock: the only thing shared across device tasks is each device's own cycle
/// counter (an atomic, see [`crate::device::Device`]), plus a single mutex
/// around the swarm-level snapshot write so concurrent "publish succeeded,
/// snapshot now" requests serialize instead of racing each other onto disk.
pub struct Swarm {
    name: String,
    devices: Vec<Arc<Device>>,
    base_dir: PathBuf,
    snapshot_lock: AsyncMutex<()>,
}

impl Swarm {
    /// Builds a new swarm from a non-empty list of devices. `name` defaults to a
    /// UUID-prefixed name when `None`, so a swarm always has an identifier even
    /// when the caller doesn't supply one.
    pub fn new(
        devices: Vec<Device>,
        name: Option<String>,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Arc<Self>, ConfigError> {
        if devices.is_empty() {
            return Err(ConfigError::EmptySwarm);
        }
        let name = name.unwrap_or_else(|| format!("swarm-{}", Uuid::new_v4()));
        Ok(Arc::new(Self {
            name,
            devices: devices.into_iter().map(Arc::new).collect(),
            base_dir: base_dir.into(),
            snapshot_lock: AsyncMutex::new(()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// `<platform-user-data-dir>/iotswarm/swarms/`, used when the caller doesn't
    /// pin a directory explicitly (tests always do, to stay hermetic).
    pub fn default_base_dir() -> Result<PathBuf, SnapshotError> {
        snapshot::default_base_dir()
    }

    /// Launches one cooperative task per device and waits for all of them to
    /// finish. Returns the first error encountered across every device, with
    /// cancellation taking priority over anything else since it represents the
    /// caller's own intent rather than a device-local failure. Data-source and
    /// publish errors never reach here: devices absorb those themselves.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), DeviceError> {
        let mut handles = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            let device = device.clone();
            let swarm = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                device.run(&swarm.name, &cancel, Some(swarm.as_ref())).await
            }));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => first_error = first_error.or(Some(err)),
                Err(join_err) => {
                    tracing::error!(swarm = %self.name, error = %join_err, "device task panicked");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Builds the full-swarm snapshot from every device's current config and
    /// cycle and writes it atomically to `base_dir`.
    async fn write_snapshot(&self) -> Result<(), SnapshotError> {
        let _guard = self.snapshot_lock.lock().await;
        let devices: Vec<DeviceSnapshot> = self
            .devices
            .iter()
            .map(|device| DeviceSnapshot {
                config: device.config().clone(),
                cycle: device.cycle(),
            })
            .collect();
        let snap = SwarmSnapshot::new(self.name.clone(), devices);
        snapshot::write(&snap, &self.base_dir)
    }

    pub fn list(base_dir: &Path) -> Result<Vec<String>, SnapshotError> {
        snapshot::list(base_dir)
    }

    pub fn exists(name: &str, base_dir: &Path) -> bool {
        snapshot::exists(name, base_dir)
    }

    pub fn destroy(name: &str, base_dir: &Path) -> Result<(), SnapshotError> {
        snapshot::destroy(name, base_dir)
    }

    pub fn init_empty(name: &str, base_dir: &Path) -> Result<(), SnapshotError> {
        snapshot::init_empty(name, base_dir)
    }

    /// Restores the device roster (config + cycle) from a prior snapshot. The
    /// caller rebuilds each device's `DataSource`, `Publisher`, and `Adapter`
    /// from `rebuild` (snapshots never carry a live connection) before handing
    /// the result back to `run`; `rebuild` receives each restored config and
    /// cycle in roster order and returns the fully reconstructed `Device`.
    pub fn load<F>(
        name: &str,
        base_dir: impl Into<PathBuf>,
        mut rebuild: F,
    ) -> Result<Arc<Self>, SnapshotError>
    where
        F: FnMut(DeviceConfig, u64) -> Device,
    {
        let base_dir = base_dir.into();
        let snap = snapshot::read(name, &base_dir)?;
        let devices = snap
            .devices
            .into_iter()
            .map(|d| rebuild(d.config, d.cycle))
            .collect::<Vec<_>>();
        Ok(Arc::new(Self {
            name: snap.name,
            devices: devices.into_iter().map(Arc::new).collect(),
            base_dir,
            snapshot_lock: AsyncMutex::new(()),
        }))
    }

    /// Read-only views of every device, for callers (e.g. the live-upload or CLI
    /// surface) that only need config and cycle, not the ability to run.
    pub fn device_views(&self) -> Vec<DeviceView> {
        self.devices.iter().map(|d| d.view()).collect()
    }
}

#[async_trait]
impl SnapshotRequester for Swarm {
    async fn request_snapshot(&self) {
        if let Err(err) = self.write_snapshot().await {
            tracing::warn!(swarm = %self.name, error = %err, "failed to write swarm snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Passthrough;
    use crate::config::{DeviceConfig, DeviceType};
    use crate::datasource::LoopingCsv;
    use crate::publisher::Mock as MockPublisher;
    use std::io::Write;

    fn csv_source(rows: &str) -> Arc<dyn crate::datasource::DataSource> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        Arc::new(LoopingCsv::from_path(file.path()).unwrap())
    }

    fn device(id: &str, max_cycles: u64, rows: &str) -> Device {
        let config = DeviceConfig::new(
            id,
            DeviceType::Base,
            0,
            max_cycles,
            false,
            0,
            None,
            false,
            None,
            None,
            None,
        )
        .unwrap();
        Device::new(
            config,
            csv_source(rows),
            Arc::new(MockPublisher::new()),
            Arc::new(Passthrough::new()),
        )
    }

    #[tokio::test]
    async fn runs_three_devices_to_their_own_max_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let devices = vec![
            device("MORLY", 1, "SITE_ID,temp\nMORLY,1\n"),
            device("ALIC1", 4, "SITE_ID,temp\nALIC1,1\n"),
            device("EUSTN", 6, "SITE_ID,temp\nEUSTN,1\n"),
        ];
        let swarm = Swarm::new(devices, Some("s2".to_string()), dir.path()).unwrap();

        swarm.run(CancellationToken::new()).await.unwrap();

        let cycles: Vec<u64> = swarm.devices().iter().map(|d| d.cycle()).collect();
        assert_eq!(cycles, vec![1, 4, 6]);
    }

    #[tokio::test]
    async fn snapshot_reflects_cycle_after_publish() {
        let dir = tempfile::tempdir().unwrap();
        let devices = vec![device("ALIC1", 3, "SITE_ID,temp\nALIC1,1\n")];
        let swarm = Swarm::new(devices, Some("snap-test".to_string()), dir.path()).unwrap();

        swarm.run(CancellationToken::new()).await.unwrap();

        let snap = snapshot::read("snap-test", dir.path()).unwrap();
        assert_eq!(snap.devices[0].cycle, 3);
    }

    #[tokio::test]
    async fn load_of_store_preserves_name_config_and_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let devices = vec![
            device("ALIC1", 3, "SITE_ID,temp\nALIC1,1\n"),
            device("MORLY", 5, "SITE_ID,temp\nMORLY,1\n"),
        ];
        let swarm = Swarm::new(devices, Some("roundtrip".to_string()), dir.path()).unwrap();
        swarm.run(CancellationToken::new()).await.unwrap();

        let reloaded = Swarm::load("roundtrip", dir.path(), |config, cycle| {
            Device::resume(
                config,
                cycle,
                csv_source("SITE_ID,temp\nX,1\n"),
                Arc::new(MockPublisher::new()),
                Arc::new(Passthrough::new()),
            )
        })
        .unwrap();

        assert_eq!(reloaded.name(), swarm.name());
        assert_eq!(reloaded.devices().len(), swarm.devices().len());
        for (original, restored) in swarm.devices().iter().zip(reloaded.devices().iter()) {
            assert_eq!(original.config(), restored.config());
            assert_eq!(original.cycle(), restored.cycle());
            assert_eq!(**original, **restored);
        }
    }

    #[tokio::test]
    async fn empty_device_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Swarm::new(Vec::new(), None, dir.path()),
            Err(ConfigError::EmptySwarm)
        ));
    }

    #[tokio::test]
    async fn load_resumes_cycle_and_raised_max_cycles_runs_to_new_completion() {
        let dir = tempfile::tempdir().unwrap();
        let devices = vec![device("ALIC1", 2, "SITE_ID,temp\nALIC1,1\n")];
        let swarm = Swarm::new(devices, Some("resume".to_string()), dir.path()).unwrap();
        swarm.run(CancellationToken::new()).await.unwrap();
        assert_eq!(swarm.devices()[0].cycle(), 2);

        let rows = "SITE_ID,temp\nALIC1,1\n";
        let reloaded = Swarm::load("resume", dir.path(), |mut config, cycle| {
            config.max_cycles = 4;
            Device::resume(
                config,
                cycle,
                csv_source(rows),
                Arc::new(MockPublisher::new()),
                Arc::new(Passthrough::new()),
            )
        })
        .unwrap();

        reloaded.run(CancellationToken::new()).await.unwrap();
        assert_eq!(reloaded.devices()[0].cycle(), 4);
    }
}
