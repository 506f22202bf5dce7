//! Canonical local playback view
//!
//! Owned exclusively by the reconciler; every mutation flows through its
//! message-application and command paths. UI collaborators receive clones
//! via the event bus and never write back.

use std::time::Instant;

use chime_common::{RepeatMode, ShuffleMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{SavedSnapshot, DEFAULT_VOLUME};

/// Display sentinel for unknown track metadata
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Reconciler lifecycle phase.
///
/// `Idle`: no track loaded. `Loading`: a pending operation is active and
/// the media engine is (re)configuring. `Ready`: metadata present and
/// playback controllable. Failures in `Loading` fall back to the prior
/// phase; there is no terminal error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Loading,
    Ready,
}

/// The one in-flight song switch, if any.
///
/// Exactly one may be active per client; a conflicting switch request is
/// deferred (not queued) while one is pending, which prevents overlapping
/// media-engine reconfiguration races.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub operation_id: Uuid,
    pub track_id: String,
    pub started_at: Instant,
    /// Position to seek to once the engine reports ready
    pub target_position: f64,
    /// Whether to start playback once ready
    pub target_playing: bool,
}

impl PendingOperation {
    pub fn new(track_id: String, target_position: f64, target_playing: bool) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            track_id,
            started_at: Instant::now(),
            target_position,
            target_playing,
        }
    }
}

/// Local authoritative playback state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackView {
    pub current_track_id: Option<String>,
    pub track_title: String,
    pub track_artist: String,
    pub is_playing: bool,
    /// Non-negative playback position in seconds
    pub position_seconds: f64,
    /// Non-negative duration in seconds; 0 means unknown
    pub duration_seconds: f64,
    /// Authoritative for this device only; never written by server messages
    pub device_volume: f64,
    pub shuffle_mode: ShuffleMode,
    pub repeat_mode: RepeatMode,
    /// Insertion order = play order; used for change detection only
    pub queue_snapshot: Vec<String>,
    /// Timestamp of the most recent applied server state; monotonically
    /// non-decreasing once set
    pub last_applied_server_timestamp: Option<i64>,
}

impl Default for PlaybackView {
    fn default() -> Self {
        Self {
            current_track_id: None,
            track_title: UNKNOWN_LABEL.to_string(),
            track_artist: UNKNOWN_LABEL.to_string(),
            is_playing: false,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            device_volume: DEFAULT_VOLUME,
            shuffle_mode: ShuffleMode::Off,
            repeat_mode: RepeatMode::Off,
            queue_snapshot: Vec::new(),
            last_applied_server_timestamp: None,
        }
    }
}

impl PlaybackView {
    /// Clamp a seek target into this view's valid position range.
    ///
    /// Duration 0 means unknown; only the lower bound applies then.
    pub fn clamp_position(&self, seconds: f64) -> f64 {
        let lower = seconds.max(0.0);
        if self.duration_seconds > 0.0 {
            lower.min(self.duration_seconds)
        } else {
            lower
        }
    }

    /// Seed display fields from a persisted snapshot for instant paint.
    pub fn apply_snapshot(&mut self, snapshot: &SavedSnapshot) {
        self.current_track_id = snapshot.current_track_id.clone();
        self.track_title = snapshot.song_name.clone();
        self.track_artist = snapshot.artist.clone();
        self.is_playing = snapshot.playing;
        self.duration_seconds = snapshot.duration.max(0.0);
        self.shuffle_mode = snapshot.shuffle_mode;
        self.repeat_mode = snapshot.repeat_mode;
        self.last_applied_server_timestamp = Some(snapshot.timestamp);
        if let Some(position) = snapshot.current_time {
            self.position_seconds = self.clamp_position(position);
        }
        // device_volume intentionally untouched here: the device store is
        // consulted first and outranks the snapshot's copy
    }

    /// Capture the view into the persisted snapshot shape.
    pub fn to_snapshot(
        &self,
        device_id: &str,
        timestamp: i64,
        offline_position: Option<f64>,
    ) -> SavedSnapshot {
        SavedSnapshot {
            current_track_id: self.current_track_id.clone(),
            song_name: self.track_title.clone(),
            artist: self.track_artist.clone(),
            playing: self.is_playing,
            duration: self.duration_seconds,
            volume: self.device_volume,
            shuffle_mode: self.shuffle_mode,
            repeat_mode: self.repeat_mode,
            timestamp,
            device_id: device_id.to_string(),
            current_time: offline_position,
            saved_offline: offline_position.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_view_uses_unknown_sentinels() {
        let view = PlaybackView::default();
        assert_eq!(view.track_title, UNKNOWN_LABEL);
        assert_eq!(view.track_artist, UNKNOWN_LABEL);
        assert_eq!(view.device_volume, DEFAULT_VOLUME);
        assert!(view.last_applied_server_timestamp.is_none());
    }

    #[test]
    fn test_clamp_respects_known_duration() {
        let view = PlaybackView {
            duration_seconds: 180.0,
            ..Default::default()
        };
        assert_eq!(view.clamp_position(-5.0), 0.0);
        assert_eq!(view.clamp_position(500.0), 180.0);
        assert_eq!(view.clamp_position(20.0), 20.0);
    }

    #[test]
    fn test_clamp_with_unknown_duration_only_floors() {
        let view = PlaybackView::default();
        assert_eq!(view.clamp_position(-1.0), 0.0);
        assert_eq!(view.clamp_position(9999.0), 9999.0);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_display_fields() {
        let view = PlaybackView {
            current_track_id: Some("7".into()),
            track_title: "Title".into(),
            track_artist: "Artist".into(),
            is_playing: true,
            duration_seconds: 200.0,
            ..Default::default()
        };
        let snap = view.to_snapshot("device", 1234, None);
        assert!(!snap.saved_offline);

        let mut restored = PlaybackView::default();
        restored.apply_snapshot(&snap);
        assert_eq!(restored.current_track_id.as_deref(), Some("7"));
        assert_eq!(restored.track_title, "Title");
        assert!(restored.is_playing);
        assert_eq!(restored.last_applied_server_timestamp, Some(1234));
    }

    #[test]
    fn test_offline_snapshot_carries_position() {
        let view = PlaybackView {
            duration_seconds: 100.0,
            ..Default::default()
        };
        let snap = view.to_snapshot("device", 1, Some(42.0));
        assert!(snap.saved_offline);

        let mut restored = PlaybackView {
            duration_seconds: 100.0,
            ..Default::default()
        };
        restored.apply_snapshot(&snap);
        assert_eq!(restored.position_seconds, 42.0);
    }
}
