//! Durable binary encoding of a swarm's resumable state.
//!
//! The format is a version-tagged `bincode` blob with fields in declaration
//! order, the same stable-schema approach used elsewhere in this workspace for
//! on-disk segment headers. The `Publisher` and any live data-source
//! connection are never part of this type; they are reconstructed by the
//! caller after [`read`].

use crate::config::DeviceConfig;
use crate::error::SnapshotError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_EXTENSION: &str = "snap";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub config: DeviceConfig,
    pub cycle: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub version: u32,
    pub name: String,
    pub devices: Vec<DeviceSnapshot>,
}

impl SwarmSnapshot {
    pub fn new(name: impl Into<String>, devices: Vec<DeviceSnapshot>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            name: name.into(),
            devices,
        }
    }
}

/// `<platform-user-data-dir>/iotswarm/swarms/`, created on first use.
pub fn default_base_dir() -> Result<PathBuf, SnapshotError> {
    let dirs = ProjectDirs::from("", "", "iotswarm")
        .ok_or_else(|| SnapshotError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine a user data directory on this platform",
        )))?;
    Ok(dirs.data_dir().join("swarms"))
}

fn snapshot_path(name: &str, base_dir: &Path) -> PathBuf {
    base_dir.join(format!("{name}.{SNAPSHOT_EXTENSION}"))
}

/// Serializes `snapshot` and replaces any prior file for this name atomically:
/// write to a sibling `.tmp` path, then rename over the destination.
pub fn write(snapshot: &SwarmSnapshot, base_dir: &Path) -> Result<(), SnapshotError> {
    std::fs::create_dir_all(base_dir)?;
    let encoded = bincode::serialize(snapshot)?;
    let final_path = snapshot_path(&snapshot.name, base_dir);
    let tmp_path = final_path.with_extension(format!("{SNAPSHOT_EXTENSION}.tmp"));
    std::fs::write(&tmp_path, encoded)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

pub fn read(name: &str, base_dir: &Path) -> Result<SwarmSnapshot, SnapshotError> {
    let path = snapshot_path(name, base_dir);
    if !path.exists() {
        return Err(SnapshotError::NotFound(name.to_string()));
    }
    let bytes = std::fs::read(&path)?;
    Ok(bincode::deserialize(&bytes)?)
}

pub fn exists(name: &str, base_dir: &Path) -> bool {
    snapshot_path(name, base_dir).is_file()
}

pub fn list(base_dir: &Path) -> Result<Vec<String>, SnapshotError> {
    if !base_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXTENSION) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

pub fn destroy(name: &str, base_dir: &Path) -> Result<(), SnapshotError> {
    let path = snapshot_path(name, base_dir);
    if !path.is_file() {
        return Err(SnapshotError::NotFound(name.to_string()));
    }
    std::fs::remove_file(path)?;
    Ok(())
}

/// Creates a placeholder snapshot with no devices, refusing to overwrite one that
/// already exists.
pub fn init_empty(name: &str, base_dir: &Path) -> Result<(), SnapshotError> {
    if exists(name, base_dir) {
        return Err(SnapshotError::AlreadyExists(name.to_string()));
    }
    write(&SwarmSnapshot::new(name, Vec::new()), base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceType;

    fn sample(name: &str) -> SwarmSnapshot {
        SwarmSnapshot::new(
            name,
            vec![DeviceSnapshot {
                config: DeviceConfig::new(
                    "ALIC1",
                    DeviceType::Base,
                    60,
                    0,
                    false,
                    0,
                    None,
                    false,
                    None,
                    None,
                    None,
                )
                .unwrap(),
                cycle: 7,
            }],
        )
    }

    #[test]
    fn round_trips_through_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let snap = sample("test-swarm");
        write(&snap, dir.path()).unwrap();

        let loaded = read("test-swarm", dir.path()).unwrap();
        assert_eq!(loaded.name, "test-swarm");
        assert_eq!(loaded.devices.len(), 1);
        assert_eq!(loaded.devices[0].cycle, 7);
        assert_eq!(loaded.devices[0].config.device_id, "ALIC1");
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read("nope", dir.path()),
            Err(SnapshotError::NotFound(_))
        ));
    }

    #[test]
    fn list_and_destroy_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        write(&sample("a"), dir.path()).unwrap();
        write(&sample("b"), dir.path()).unwrap();

        let names = list(dir.path()).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        destroy("a", dir.path()).unwrap();
        assert!(!exists("a", dir.path()));
        assert!(exists("b", dir.path()));
    }

    #[test]
    fn init_empty_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        init_empty("fresh", dir.path()).unwrap();
        assert!(matches!(
            init_empty("fresh", dir.path()),
            Err(SnapshotError::AlreadyExists(_))
        ));
    }
}
