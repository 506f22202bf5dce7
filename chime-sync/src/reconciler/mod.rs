//! Playback state reconciliation
//!
//! The core state machine. Holds the canonical [`PlaybackView`], applies
//! inbound server state in sequenced order, drives the external media
//! engine, and exposes the outbound command API (see `actions`). All
//! failures recover here; nothing propagates to the hosting application as
//! a panic or unhandled error.

mod actions;
mod view;

pub use view::{PendingOperation, PlaybackView, SyncPhase, UNKNOWN_LABEL};

use std::time::{Duration, Instant};

use chime_common::time::{now_millis, LocalClock};
use chime_common::{ClientCommand, Result, ServerState};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::drift::{extrapolate_server_position, DriftModel};
use crate::media::{MediaEngine, MediaEvent};
use crate::store::DeviceStore;
use crate::suppressor::{ActionKind, ActionSuppressor};
use crate::transport::TransportHandle;

/// Pauses shorter than this resume in place without re-seeking
const RESUME_FAST_PATH: Duration = Duration::from_secs(5);

/// Notifications for UI collaborators, broadcast from the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The playback view changed; repaint from the attached copy
    ViewChanged(PlaybackView),
    /// Queue contents changed; refetch queue displays
    QueueChanged,
    /// Play history changed; refetch history displays
    HistoryChanged,
    /// Transient user-visible notice (rollbacks, load failures, skips)
    Notice(String),
    /// Channel is up; enable controls
    TransportUp,
    /// Channel is down; disable controls until reconnect
    TransportDown,
    /// A snapshot captured offline was restored; the position could not be
    /// corroborated against the server
    OfflineResume { position: f64 },
}

/// Direction for track skips. The actual track change is always driven by
/// the subsequent server push; the client never predicts queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirection {
    Previous,
    Next,
}

/// Send side for outbound commands; the transport in production, a fake in
/// tests. Fire-and-forget: an `Ok` means handed to the wire, not delivered.
pub trait CommandSink: Send {
    fn submit(&self, command: &ClientCommand) -> Result<()>;
}

impl CommandSink for TransportHandle {
    fn submit(&self, command: &ClientCommand) -> Result<()> {
        self.send(command)
    }
}

/// The reconciliation state machine.
///
/// Exclusive owner of the media engine and the playback view. Single
/// writer: the engine loop calls into it from one task only.
pub struct PlaybackReconciler<M: MediaEngine, S: CommandSink> {
    view: PlaybackView,
    phase: SyncPhase,
    /// Phase to fall back to when a load fails
    prior_phase: SyncPhase,
    pending: Option<PendingOperation>,
    suppressor: ActionSuppressor,
    drift: DriftModel,
    /// Monotonic reads (suppression, pause bookkeeping, seek throttle)
    clock: LocalClock,
    media: M,
    sink: S,
    store: DeviceStore,
    events: broadcast::Sender<EngineEvent>,
    /// Set when a pause begins locally; cleared on resume
    pause_started_at: Option<Instant>,
    seek_dragging: bool,
    volume_dragging: bool,
    last_seek_send: Option<Instant>,
    /// Seek value withheld by the throttle, flushed on the next tick
    deferred_seek: Option<f64>,
    transport_up: bool,
    /// Last server-declared position and its timestamp, for extrapolation
    last_server_position: f64,
    last_server_position_ts: i64,
}

impl<M: MediaEngine, S: CommandSink> PlaybackReconciler<M, S> {
    pub fn new(
        mut media: M,
        sink: S,
        store: DeviceStore,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let mut view = PlaybackView::default();
        view.device_volume = store.resolve_startup_volume(None);
        media.set_volume(view.device_volume);

        Self {
            view,
            phase: SyncPhase::Idle,
            prior_phase: SyncPhase::Idle,
            pending: None,
            suppressor: ActionSuppressor::new(),
            drift: DriftModel::new(),
            clock: LocalClock::new(),
            media,
            sink,
            store,
            events,
            pause_started_at: None,
            seek_dragging: false,
            volume_dragging: false,
            last_seek_send: None,
            deferred_seek: None,
            transport_up: false,
            last_server_position: 0.0,
            last_server_position_ts: 0,
        }
    }

    pub fn view(&self) -> &PlaybackView {
        &self.view
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn pending_operation(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    /// Override the echo suppression window (tests, unusual deployments).
    pub fn set_suppression_window(&mut self, window: Duration) {
        self.suppressor = ActionSuppressor::with_window(window);
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine; the host may not have subscribed yet
        let _ = self.events.send(event);
    }

    fn emit_view_changed(&self) {
        self.emit(EngineEvent::ViewChanged(self.view.clone()));
    }

    /// Restore the persisted snapshot for instant paint, if eligible
    /// (younger than 30 s and saved by this device).
    pub fn restore_startup_snapshot(&mut self, now_ms: i64) {
        let Some(snapshot) = self.store.restorable_snapshot(now_ms) else {
            return;
        };
        info!(age_ms = now_ms - snapshot.timestamp, "restoring persisted playback snapshot");
        if self.store.volume().is_none() {
            // No device-level volume yet; the snapshot carries the last
            // server-known value
            let volume = self.store.resolve_startup_volume(Some(snapshot.volume));
            self.view.device_volume = volume;
            self.media.set_volume(volume);
        }
        let offline_position = snapshot.saved_offline.then_some(snapshot.current_time).flatten();
        self.view.apply_snapshot(&snapshot);
        if let Some(position) = offline_position {
            // Position was captured without server corroboration
            self.emit(EngineEvent::OfflineResume { position });
        }
        self.emit_view_changed();
    }

    /// Apply an authoritative server state snapshot.
    ///
    /// Last-applied wins: anything older than what we already applied is
    /// dropped. Track, play/pause, and queue deltas are detected
    /// independently; the message's `volume` is never applied.
    pub fn apply_server_state(&mut self, state: ServerState) {
        if let Some(last) = self.view.last_applied_server_timestamp {
            if state.timestamp < last {
                debug!(
                    msg_ts = state.timestamp,
                    applied_ts = last,
                    "dropping stale server state"
                );
                return;
            }
        }

        let track_changed = state.current_track_id != self.view.current_track_id;
        if track_changed {
            if let Some(pending) = &self.pending {
                if state.current_track_id.as_deref() != Some(pending.track_id.as_str()) {
                    // Deferred, not queued: the next server push re-triggers.
                    // last_applied is left untouched so that push is not
                    // itself rejected as stale.
                    debug!(
                        pending_track = %pending.track_id,
                        requested_track = ?state.current_track_id,
                        "deferring track change while another is pending"
                    );
                    return;
                }
            }
        }

        let effective_playing = self.effective_playing(&state);

        if track_changed {
            self.begin_track_change(&state, effective_playing);
        } else if effective_playing != self.view.is_playing {
            self.set_playing(effective_playing);
        }

        self.view.shuffle_mode = state.shuffle_mode;
        self.view.repeat_mode = state.repeat_mode;

        if queue_changed(&self.view.queue_snapshot, &state.queue) {
            self.view.queue_snapshot = state.queue.clone();
            self.emit(EngineEvent::QueueChanged);
        }

        // state.volume is advisory only: device volume stays local (never
        // let one device's slider blast audio on every other device)

        self.last_server_position = state.current_time;
        self.last_server_position_ts = state.timestamp;
        self.view.last_applied_server_timestamp = Some(
            self.view
                .last_applied_server_timestamp
                .map_or(state.timestamp, |last| last.max(state.timestamp)),
        );

        self.emit_view_changed();
        self.persist_snapshot();
    }

    /// The play/pause value to apply, honoring the suppression window.
    ///
    /// Only the boolean is gated; every other field of the same message
    /// still applies.
    fn effective_playing(&mut self, state: &ServerState) -> bool {
        if state.playing != self.view.is_playing
            && self
                .suppressor
                .should_suppress_at(ActionKind::PlayPause, self.clock.now())
        {
            debug!("suppressing play/pause echo inside local-action window");
            self.view.is_playing
        } else {
            state.playing
        }
    }

    fn begin_track_change(&mut self, state: &ServerState, target_playing: bool) {
        match &state.current_track_id {
            Some(track_id) => {
                let target_position = state.current_time.max(0.0);
                match self.pending.as_mut() {
                    // Re-push for the switch already in flight: refresh the
                    // targets, do not reload
                    Some(pending) => {
                        pending.target_position = target_position;
                        pending.target_playing = target_playing;
                        self.paint_track_metadata(state);
                    }
                    None => {
                        let op =
                            PendingOperation::new(track_id.clone(), target_position, target_playing);
                        info!(
                            track_id = %track_id,
                            operation_id = %op.operation_id,
                            "starting track switch"
                        );
                        self.pending = Some(op);
                        self.prior_phase = self.phase;
                        self.phase = SyncPhase::Loading;
                        // Display fields paint before the audio is ready
                        self.paint_track_metadata(state);
                        self.drift.reset();
                        self.media.load(track_id);
                    }
                }
            }
            None => {
                // Explicit clear
                info!("clearing current track");
                self.pending = None;
                self.phase = SyncPhase::Idle;
                self.media.pause();
                self.view.current_track_id = None;
                self.view.track_title = UNKNOWN_LABEL.to_string();
                self.view.track_artist = UNKNOWN_LABEL.to_string();
                self.view.is_playing = false;
                self.view.position_seconds = 0.0;
                self.view.duration_seconds = 0.0;
                self.pause_started_at = None;
                self.drift.reset();
            }
        }
    }

    fn paint_track_metadata(&mut self, state: &ServerState) {
        self.view.current_track_id = state.current_track_id.clone();
        self.view.track_title = state
            .title
            .clone()
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        self.view.track_artist = state
            .artist
            .clone()
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        self.view.duration_seconds = state.duration.max(0.0);
    }

    /// Start or stop the engine to match `playing`, with pause bookkeeping.
    fn set_playing(&mut self, playing: bool) {
        if playing {
            let paused_for = self
                .pause_started_at
                .take()
                .map(|t| self.clock.now().duration_since(t));
            if let Some(paused_for) = paused_for {
                if paused_for >= RESUME_FAST_PATH {
                    // Long pause: the element may have dropped its position
                    self.media.set_position(self.view.position_seconds);
                }
            }
            self.media.play();
        } else {
            self.pause_started_at = Some(self.clock.now());
            self.media.pause();
        }
        self.view.is_playing = playing;
    }

    /// Handle an asynchronous media engine signal.
    pub fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Ready { duration } => {
                let Some(op) = self.pending.take() else {
                    // Engine-internal reload (e.g. source recovered); nothing
                    // was in flight from our side
                    self.phase = SyncPhase::Ready;
                    return;
                };
                if let Some(duration) = duration {
                    self.view.duration_seconds = duration.max(0.0);
                }
                let position = self.view.clamp_position(op.target_position);
                self.media.set_position(position);
                self.view.position_seconds = position;
                if op.target_playing {
                    self.pause_started_at = None;
                    self.media.play();
                } else {
                    self.media.pause();
                }
                self.view.is_playing = op.target_playing;
                self.phase = SyncPhase::Ready;
                info!(
                    operation_id = %op.operation_id,
                    track_id = %op.track_id,
                    position,
                    playing = op.target_playing,
                    "track switch complete"
                );
                self.emit_view_changed();
                self.persist_snapshot();
            }
            MediaEvent::Failed { detail } => {
                // No automatic retry: the next server push or a manual
                // action re-triggers
                error!(detail = %detail, "media engine failed to load source");
                self.pending = None;
                self.phase = self.prior_phase;
                self.emit(EngineEvent::Notice("Could not load track".to_string()));
            }
        }
    }

    /// One drift-correction tick (cadence 300 ms while playing).
    pub fn drift_tick(&mut self, now_ms: i64) {
        // Flush a seek the throttle withheld
        if let Some(position) = self.deferred_seek.take() {
            self.send_seek_command(position);
        }

        if self.phase != SyncPhase::Ready
            || !self.view.is_playing
            || self.last_server_position_ts == 0
        {
            return;
        }

        let local = self.media.position();
        let extrapolated = extrapolate_server_position(
            self.last_server_position,
            self.last_server_position_ts,
            now_ms,
        );
        let smoothed = self.drift.observe(extrapolated - local);

        if self.seek_dragging || !self.media.can_seek_without_stall() {
            self.view.position_seconds = local.max(0.0);
            return;
        }

        match self.drift.correction() {
            Some(correction) => {
                let corrected = self.view.clamp_position(local + correction);
                debug!(smoothed, correction, "applying drift correction");
                self.media.set_position(corrected);
                self.view.position_seconds = corrected;
            }
            None => {
                self.view.position_seconds = local.max(0.0);
            }
        }
    }

    /// Relay a trigger-only server message to UI collaborators. These never
    /// mutate the playback view.
    pub fn forward_trigger(&self, message: &chime_common::ServerMessage) {
        match message {
            chime_common::ServerMessage::QueueUpdate => self.emit(EngineEvent::QueueChanged),
            chime_common::ServerMessage::HistoryUpdate => self.emit(EngineEvent::HistoryChanged),
            chime_common::ServerMessage::State(_) => {}
        }
    }

    /// Track transport availability for snapshots and UI state.
    pub fn set_transport_up(&mut self, up: bool) {
        self.transport_up = up;
        self.emit(if up {
            EngineEvent::TransportUp
        } else {
            EngineEvent::TransportDown
        });
        if !up {
            // Capture the position now; it will not be corroborated while
            // the channel stays down
            self.persist_snapshot();
        }
    }

    pub fn is_transport_up(&self) -> bool {
        self.transport_up
    }

    /// Persist the current view. While offline the position is captured so
    /// a restart within the restore window can resume from it.
    pub fn persist_snapshot(&mut self) {
        if self.seek_dragging || self.volume_dragging {
            // Mid-drag values are transient; the release path persists
            return;
        }
        let offline_position = (!self.transport_up && self.view.current_track_id.is_some())
            .then(|| self.media.position().max(0.0));
        let snapshot = self
            .view
            .to_snapshot(self.store.device_id(), now_millis(), offline_position);
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            warn!(error = %e, "failed to persist playback snapshot");
        }
    }
}

/// Queue equality with cheap pre-checks before the full comparison.
fn queue_changed(current: &[String], incoming: &[String]) -> bool {
    if current.len() != incoming.len() {
        return true;
    }
    if current.first() != incoming.first() || current.last() != incoming.last() {
        return true;
    }
    current != incoming
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_change_detection_cheap_and_full() {
        let a = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        assert!(!queue_changed(&a, &a.clone()));

        // Length delta
        assert!(queue_changed(&a, &a[..2].to_vec()));
        // Head delta
        let mut b = a.clone();
        b[0] = "9".to_string();
        assert!(queue_changed(&a, &b));
        // Interior delta caught by the full comparison
        let mut c = a.clone();
        c[1] = "9".to_string();
        assert!(queue_changed(&a, &c));

        assert!(!queue_changed(&[], &[]));
    }
}
