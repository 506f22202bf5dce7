//! Media engine collaborator seam
//!
//! The underlying audio element is an external black box. The reconciler is
//! its sole owner: no other component may call play/pause/seek/load.
//! Asynchronous engine signals (metadata ready, load failure) come back over
//! an mpsc channel wired at engine construction, so they join the same
//! select loop as inbound server messages.

use tokio::sync::mpsc;

/// Asynchronous signals from the media engine back to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Metadata is loaded; playback is controllable
    Ready {
        /// Track duration in seconds, if known
        duration: Option<f64>,
    },
    /// The source failed to load or play (decode error, missing file, ...)
    Failed { detail: String },
}

/// Sender half handed to a [`MediaEngine`] implementation at wiring time.
pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

/// Control surface of the external playback element.
///
/// Synchronous calls mirror the HTML media element shape; implementations
/// report readiness and failure through the [`MediaEventSender`] they were
/// constructed with.
pub trait MediaEngine: Send {
    /// Begin (re)configuring the engine for a new source. Completion is
    /// signalled with [`MediaEvent::Ready`] or [`MediaEvent::Failed`].
    fn load(&mut self, track_id: &str);

    fn play(&mut self);

    fn pause(&mut self);

    /// Current playback position in seconds
    fn position(&self) -> f64;

    fn set_position(&mut self, seconds: f64);

    /// Track duration in seconds, if metadata is available
    fn duration(&self) -> Option<f64>;

    /// Volume in [0, 1]
    fn set_volume(&mut self, volume: f64);

    /// Whether enough data is buffered to seek without stalling playback.
    /// Gates drift corrections.
    fn can_seek_without_stall(&self) -> bool;
}
