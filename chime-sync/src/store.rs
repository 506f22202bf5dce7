//! Device-local persistence
//!
//! Two small JSON documents under the per-user data directory:
//!
//! - `device.json`: a device identifier generated once (uuid v4) plus the
//!   per-device playback volume. Volume is authoritative for this device
//!   only and is never overwritten by server-pushed values.
//! - `snapshot.json`: the last playback view, written on significant state
//!   changes and at shutdown, read once at startup for instant paint before
//!   the first server message lands.

use std::fs;
use std::path::{Path, PathBuf};

use chime_common::{Error, RepeatMode, Result, ShuffleMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Snapshots older than this are never restored
pub const SNAPSHOT_MAX_AGE_MS: i64 = 30_000;

/// Volume fallback when neither the device store nor the server knows one
pub const DEFAULT_VOLUME: f64 = 0.8;

const DEVICE_FILE: &str = "device.json";
const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRecord {
    device_id: String,
    #[serde(default)]
    volume: Option<f64>,
}

/// Persisted playback snapshot, written on state changes and page/app exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSnapshot {
    pub current_track_id: Option<String>,
    pub song_name: String,
    pub artist: String,
    pub playing: bool,
    pub duration: f64,
    pub volume: f64,
    pub shuffle_mode: ShuffleMode,
    pub repeat_mode: RepeatMode,
    /// Epoch millis when the snapshot was taken
    pub timestamp: i64,
    pub device_id: String,
    /// Present only if captured while offline; restoring it warrants a
    /// user-visible notice because the position was never corroborated
    pub current_time: Option<f64>,
    pub saved_offline: bool,
}

/// Device identity, per-device volume, and snapshot files.
#[derive(Debug)]
pub struct DeviceStore {
    dir: PathBuf,
    record: DeviceRecord,
}

impl DeviceStore {
    /// Open the store in the platform data directory, creating the device
    /// identity on first run.
    pub fn open() -> Result<Self> {
        let dir = dirs::data_local_dir()
            .map(|d| d.join("chime"))
            .ok_or_else(|| Error::Store("could not determine data directory".into()))?;
        Self::open_at(dir)
    }

    /// Open the store rooted at an explicit directory.
    pub fn open_at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let device_path = dir.join(DEVICE_FILE);
        let record = match read_json::<DeviceRecord>(&device_path) {
            Some(record) => record,
            None => {
                let record = DeviceRecord {
                    device_id: Uuid::new_v4().to_string(),
                    volume: None,
                };
                write_json(&device_path, &record)?;
                debug!(device_id = %record.device_id, "generated new device identity");
                record
            }
        };

        Ok(Self { dir, record })
    }

    /// Stable identifier for this physical device.
    pub fn device_id(&self) -> &str {
        &self.record.device_id
    }

    /// Persisted per-device volume, if one was ever set.
    pub fn volume(&self) -> Option<f64> {
        self.record.volume
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.record.volume = Some(volume.clamp(0.0, 1.0));
        write_json(&self.dir.join(DEVICE_FILE), &self.record)
    }

    /// Startup volume: device store first, then the last server-known
    /// volume, then the hardcoded default.
    pub fn resolve_startup_volume(&self, server_known: Option<f64>) -> f64 {
        self.record
            .volume
            .or(server_known)
            .unwrap_or(DEFAULT_VOLUME)
            .clamp(0.0, 1.0)
    }

    pub fn save_snapshot(&self, snapshot: &SavedSnapshot) -> Result<()> {
        write_json(&self.dir.join(SNAPSHOT_FILE), snapshot)
    }

    /// Raw snapshot, regardless of age or origin.
    pub fn load_snapshot(&self) -> Option<SavedSnapshot> {
        read_json(&self.dir.join(SNAPSHOT_FILE))
    }

    /// Snapshot eligible for restoration: younger than 30 seconds and saved
    /// by this same device.
    pub fn restorable_snapshot(&self, now_millis: i64) -> Option<SavedSnapshot> {
        let snapshot = self.load_snapshot()?;
        let age = now_millis - snapshot.timestamp;
        if !(0..SNAPSHOT_MAX_AGE_MS).contains(&age) {
            debug!(age_ms = age, "ignoring stale persisted snapshot");
            return None;
        }
        if snapshot.device_id != self.record.device_id {
            debug!("ignoring snapshot saved by a different device");
            return None;
        }
        Some(snapshot)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding unreadable store file");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
