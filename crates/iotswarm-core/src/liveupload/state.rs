//! Durable per-table high-water-mark tracking for the live-upload sibling
//! subsystem.
//!
//! A primary file plus a `.backup` sibling: corruption of the primary falls
//! back to the backup (and rewrites the primary from it), corruption of both
//! is fatal. Encoded with `bincode`, matching `crate::snapshot`'s
//! stable-binary-schema approach.

use crate::error::LiveUploadError;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = "backup";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HighWaterMarkState {
    pub last_run: Option<DateTime<Utc>>,
    pub sites: IndexMap<String, DateTime<Utc>>,
}

/// Tracks and persists the most recent `date_time` successfully replicated per
/// site for one table. One instance per `(app_name, table)` pair - state is
/// scoped per table, not shared globally across the whole upload fleet.
pub struct HighWaterMarkStore {
    primary: PathBuf,
    backup: PathBuf,
    pub state: HighWaterMarkState,
}

impl HighWaterMarkStore {
    /// `<platform-user-state-dir>/<app_name>/<table>.state` plus a `.backup`
    /// sibling, created on demand.
    pub fn default_path(app_name: &str, table_file_stem: &str) -> Result<PathBuf, LiveUploadError> {
        let dirs = ProjectDirs::from("", "", app_name).ok_or_else(|| {
            LiveUploadError::StateCorruption(
                "could not determine a user state directory on this platform".to_string(),
            )
        })?;
        Ok(dirs
            .state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .join(format!("{table_file_stem}.state")))
    }

    /// Loads state from `primary_path`, falling back to `<primary_path>.backup`
    /// on corruption or a missing primary. Both unreadable is fatal for this
    /// table.
    pub fn load(primary_path: impl Into<PathBuf>) -> Result<Self, LiveUploadError> {
        let primary = primary_path.into();
        let backup = backup_path(&primary);

        let state = match read_state(&primary) {
            Ok(Some(state)) => state,
            Ok(None) => HighWaterMarkState::default(),
            Err(_primary_corrupt) => match read_state(&backup) {
                Ok(Some(state)) => {
                    tracing::warn!(path = %primary.display(), "primary state corrupted, rescuing from backup");
                    write_state(&primary, &state)?;
                    state
                }
                Ok(None) => HighWaterMarkState::default(),
                Err(backup_corrupt) => {
                    return Err(LiveUploadError::StateCorruption(format!(
                        "both state files unreadable for {}: {backup_corrupt}",
                        primary.display()
                    )))
                }
            },
        };

        Ok(Self {
            primary,
            backup,
            state,
        })
    }

    pub fn last_seen(&self, site_id: &str) -> Option<DateTime<Utc>> {
        self.state.sites.get(site_id).copied()
    }

    /// Advances the high-water-mark for `site_id` if `seen_at` is newer than
    /// what's recorded. Returns whether the state actually changed.
    pub fn advance(&mut self, site_id: &str, seen_at: DateTime<Utc>) -> bool {
        let mut changed = false;
        let last_run_is_older = match self.state.last_run {
            Some(last_run) => last_run < seen_at,
            None => true,
        };
        if last_run_is_older {
            self.state.last_run = Some(seen_at);
            changed = true;
        }
        let newer = match self.state.sites.get(site_id) {
            Some(current) => *current < seen_at,
            None => true,
        };
        if newer {
            self.state.sites.insert(site_id.to_string(), seen_at);
            changed = true;
        }
        changed
    }

    /// Writes the current state to both the primary and backup files.
    pub fn persist(&self) -> Result<(), LiveUploadError> {
        write_state(&self.primary, &self.state)?;
        write_state(&self.backup, &self.state)?;
        Ok(())
    }
}

fn backup_path(primary: &Path) -> PathBuf {
    let mut name = primary.as_os_str().to_owned();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// `Ok(None)` for a missing file (not yet written - not corruption), `Err` for
/// anything present but undecodable.
fn read_state(path: &Path) -> Result<Option<HighWaterMarkState>, bincode::Error> {
    match std::fs::read(path) {
        Ok(bytes) => bincode::deserialize(&bytes).map(Some),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Box::new(bincode::ErrorKind::Io(err))),
    }
}

fn write_state(path: &Path, state: &HighWaterMarkState) -> Result<(), LiveUploadError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let encoded = bincode::serialize(state)?;
    std::fs::write(path, encoded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn advance_only_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HighWaterMarkStore::load(dir.path().join("t.state")).unwrap();

        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        assert!(store.advance("ALIC1", t1));
        assert!(!store.advance("ALIC1", t0));
        assert_eq!(store.last_seen("ALIC1"), Some(t1));
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.state");
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        {
            let mut store = HighWaterMarkStore::load(&path).unwrap();
            store.advance("ALIC1", t1);
            store.persist().unwrap();
        }

        let reloaded = HighWaterMarkStore::load(&path).unwrap();
        assert_eq!(reloaded.last_seen("ALIC1"), Some(t1));
    }

    #[test]
    fn corrupted_primary_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.state");
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        {
            let mut store = HighWaterMarkStore::load(&path).unwrap();
            store.advance("ALIC1", t1);
            store.persist().unwrap();
        }

        std::fs::write(&path, b"not a valid bincode blob at all \xff\xfe").unwrap();

        let rescued = HighWaterMarkStore::load(&path).unwrap();
        assert_eq!(rescued.last_seen("ALIC1"), Some(t1));
        // The primary file should have been rewritten from the backup.
        let reloaded_again = HighWaterMarkStore::load(&path).unwrap();
        assert_eq!(reloaded_again.last_seen("ALIC1"), Some(t1));
    }

    #[test]
    fn both_corrupted_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.state");
        std::fs::write(&path, b"\xff\xff\xff").unwrap();
        std::fs::write(backup_path(&path), b"\xff\xff\xff").unwrap();

        assert!(matches!(
            HighWaterMarkStore::load(&path),
            Err(LiveUploadError::StateCorruption(_))
        ));
    }
}
