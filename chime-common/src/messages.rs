//! Wire message types for the Chime sync channel
//!
//! The server authority pushes `ServerMessage` values over the duplex
//! channel; the client sends `ClientCommand` values back, fire-and-forget.
//! All inbound kinds live in one tagged enum so handling is exhaustive.

use serde::{Deserialize, Serialize};

/// Inbound server → client messages.
///
/// Wire shape: `{ "type": "...", "payload": {...} }`. Trigger-only kinds
/// (`queueUpdate`, `historyUpdate`) carry no payload; external collaborators
/// react by refetching, they never mutate the playback view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full authoritative playback state snapshot
    State(ServerState),
    /// Queue contents changed server-side; refetch if displaying the queue
    QueueUpdate,
    /// Play history changed server-side
    HistoryUpdate,
}

impl ServerMessage {
    /// Full-state snapshots are processed ahead of all other queued kinds
    pub fn is_full_state(&self) -> bool {
        matches!(self, ServerMessage::State(_))
    }
}

/// Authoritative playback state as pushed by the server.
///
/// Consumed and discarded by the reconciler; never stored as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    pub current_track_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    pub playing: bool,
    /// Playback position in seconds at `timestamp`
    pub current_time: f64,
    /// Track duration in seconds; 0 means unknown
    #[serde(default)]
    pub duration: f64,
    /// Advisory only: the sender's last-known volume. Never applied locally.
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub shuffle_mode: ShuffleMode,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub queue: Vec<String>,
    /// Epoch millis at the authority; required for staleness checks
    pub timestamp: i64,
}

/// Shuffle mode, cycled by the user in a fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShuffleMode {
    #[default]
    Off,
    Shuffle,
    SmartShuffle,
}

impl ShuffleMode {
    /// Off → Shuffle → SmartShuffle → Off
    pub fn cycle(self) -> Self {
        match self {
            ShuffleMode::Off => ShuffleMode::Shuffle,
            ShuffleMode::Shuffle => ShuffleMode::SmartShuffle,
            ShuffleMode::SmartShuffle => ShuffleMode::Off,
        }
    }
}

impl std::fmt::Display for ShuffleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShuffleMode::Off => write!(f, "off"),
            ShuffleMode::Shuffle => write!(f, "shuffle"),
            ShuffleMode::SmartShuffle => write!(f, "smart shuffle"),
        }
    }
}

/// Repeat mode, cycled by the user in a fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    /// Off → One → All → Off
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::One => write!(f, "one"),
            RepeatMode::All => write!(f, "all"),
        }
    }
}

/// Outbound client → server commands, one per user action.
///
/// Fire-and-forget: there is no per-command acknowledgment. The server's
/// next full-state push is the only confirmation mechanism. Volume is
/// deliberately absent: it is local to the device and never synchronized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientCommand {
    TogglePlayback,
    Seek { position: f64 },
    Previous,
    Next,
    CycleShuffle,
    CycleRepeat,
    #[serde(rename_all = "camelCase")]
    Enqueue { track_id: String },
    /// Ask the authority to re-push its full state (sent after reconnect)
    RequestState,
}
