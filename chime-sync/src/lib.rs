//! # Chime Playback Sync Engine (chime-sync)
//!
//! Client-side playback state reconciliation: keeps a locally playing media
//! engine consistent with a server authority over an unreliable duplex
//! channel, absorbing local user actions without flicker or echo.
//!
//! **Purpose:** apply server-pushed state snapshots in order, drive the
//! external media engine, correct clock drift, and expose the optimistic
//! command API (play/pause, seek, volume, skip, shuffle/repeat).
//!
//! **Architecture:** one owning task per engine instance. Inbound messages
//! flow transport → sequencer → reconciler; user actions and media-engine
//! callbacks join the same select loop, so the playback view has exactly
//! one writer.

pub mod drift;
pub mod engine;
pub mod media;
pub mod reconciler;
pub mod resync;
pub mod sequencer;
pub mod store;
pub mod suppressor;
pub mod transport;

pub use chime_common::{ClientCommand, Error, RepeatMode, Result, ServerMessage, ServerState, ShuffleMode};
pub use engine::{EngineConfig, SyncEngine, SyncHandle};
pub use media::{MediaEngine, MediaEvent};
pub use reconciler::{EngineEvent, PlaybackReconciler, PlaybackView, SkipDirection, SyncPhase};
