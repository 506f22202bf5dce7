//! Outbound command API: optimistic local updates with rollback
//!
//! User actions apply to the local view and media engine immediately for
//! responsiveness, then go to the server fire-and-forget. When the send
//! fails the optimistic change is rolled back and a transient notice is
//! surfaced; the user never sees raw error text. Local commands are
//! intentionally not serialized against inbound messages; the suppressor
//! and these rollback paths stand in for mutual exclusion.

use std::time::Duration;

use chime_common::ClientCommand;
use tracing::{debug, warn};

use crate::media::MediaEngine;
use crate::suppressor::ActionKind;

use super::{CommandSink, EngineEvent, PlaybackReconciler, SkipDirection};

/// Minimum spacing between outbound seek commands during rapid repeats
const SEEK_SEND_INTERVAL: Duration = Duration::from_millis(100);

impl<M: MediaEngine, S: CommandSink> PlaybackReconciler<M, S> {
    /// Toggle play/pause: optimistic flip, echo suppression, rollback on a
    /// failed send.
    pub fn issue_play_pause_toggle(&mut self) {
        let target = !self.view.is_playing;
        self.suppressor.record_at(ActionKind::PlayPause, self.clock.now());
        self.set_playing(target);
        self.emit_view_changed();

        if let Err(e) = self.sink.submit(&ClientCommand::TogglePlayback) {
            warn!(error = %e, "play/pause command failed, rolling back");
            self.set_playing(!target);
            self.emit_view_changed();
            self.emit(EngineEvent::Notice("Playback toggle didn't reach the server".to_string()));
        }
    }

    /// Advance shuffle mode one step; rollback on a failed send.
    pub fn issue_shuffle_cycle(&mut self) {
        let previous = self.view.shuffle_mode;
        self.view.shuffle_mode = previous.cycle();
        self.emit_view_changed();

        if let Err(e) = self.sink.submit(&ClientCommand::CycleShuffle) {
            warn!(error = %e, "shuffle command failed, rolling back");
            self.view.shuffle_mode = previous;
            self.emit_view_changed();
            self.emit(EngineEvent::Notice("Shuffle change didn't reach the server".to_string()));
        }
    }

    /// Advance repeat mode one step; rollback on a failed send.
    pub fn issue_repeat_cycle(&mut self) {
        let previous = self.view.repeat_mode;
        self.view.repeat_mode = previous.cycle();
        self.emit_view_changed();

        if let Err(e) = self.sink.submit(&ClientCommand::CycleRepeat) {
            warn!(error = %e, "repeat command failed, rolling back");
            self.view.repeat_mode = previous;
            self.emit_view_changed();
            self.emit(EngineEvent::Notice("Repeat change didn't reach the server".to_string()));
        }
    }

    /// Seek to `target_seconds` (clamped). Local position moves at once; the
    /// outbound command is throttled so drag-adjacent repeats cannot flood
    /// the channel; a withheld value is flushed on the next engine tick.
    pub fn issue_seek(&mut self, target_seconds: f64) {
        let position = self.view.clamp_position(target_seconds);
        self.view.position_seconds = position;
        self.media.set_position(position);
        self.drift.reset();
        self.emit_view_changed();

        let now = self.clock.now();
        let allowed = self
            .last_seek_send
            .map_or(true, |last| now.duration_since(last) >= SEEK_SEND_INTERVAL);
        if allowed {
            self.send_seek_command(position);
        } else {
            self.deferred_seek = Some(position);
        }
    }

    pub(super) fn send_seek_command(&mut self, position: f64) {
        self.last_seek_send = Some(self.clock.now());
        if let Err(e) = self.sink.submit(&ClientCommand::Seek { position }) {
            // No boolean to flicker; the local position stands and the next
            // applied server state reconverges
            debug!(error = %e, "seek command not delivered");
        }
    }

    /// Change this device's volume. Applied locally and persisted, never
    /// sent to the server: volume is per-device by design.
    pub fn issue_volume_change(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        self.view.device_volume = volume;
        self.media.set_volume(volume);
        if let Err(e) = self.store.set_volume(volume) {
            warn!(error = %e, "failed to persist device volume");
        }
        self.emit_view_changed();
    }

    /// Skip to the previous/next track. Optimistic feedback only: the track
    /// change itself arrives with the next server push, because the server
    /// owns queue order and shuffle resolution.
    pub fn issue_skip(&mut self, direction: SkipDirection) {
        let (command, notice) = match direction {
            SkipDirection::Previous => (ClientCommand::Previous, "Previous track"),
            SkipDirection::Next => (ClientCommand::Next, "Next track"),
        };
        self.emit(EngineEvent::Notice(notice.to_string()));
        if let Err(e) = self.sink.submit(&command) {
            warn!(error = %e, "skip command failed");
            self.emit(EngineEvent::Notice("Skip didn't reach the server".to_string()));
        }
    }

    /// Add a track to the shared queue, fire-and-forget.
    pub fn issue_enqueue(&mut self, track_id: String) {
        if let Err(e) = self.sink.submit(&ClientCommand::Enqueue { track_id }) {
            warn!(error = %e, "enqueue command failed");
            self.emit(EngineEvent::Notice("Enqueue didn't reach the server".to_string()));
        }
    }

    // Drag interactions: intermediate values update the local view and
    // media engine only; exactly one command goes out at release.

    pub fn begin_seek_drag(&mut self) {
        self.seek_dragging = true;
    }

    pub fn update_seek_drag(&mut self, target_seconds: f64) {
        let position = self.view.clamp_position(target_seconds);
        self.view.position_seconds = position;
        self.media.set_position(position);
        self.emit_view_changed();
    }

    pub fn end_seek_drag(&mut self, target_seconds: f64) {
        self.seek_dragging = false;
        let position = self.view.clamp_position(target_seconds);
        self.view.position_seconds = position;
        self.media.set_position(position);
        self.drift.reset();
        self.deferred_seek = None;
        self.emit_view_changed();
        // The one send for the whole drag
        self.send_seek_command(position);
    }

    pub fn begin_volume_drag(&mut self) {
        self.volume_dragging = true;
    }

    pub fn update_volume_drag(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        self.view.device_volume = volume;
        self.media.set_volume(volume);
        self.emit_view_changed();
    }

    pub fn end_volume_drag(&mut self, volume: f64) {
        self.volume_dragging = false;
        // Persist only the final value
        self.issue_volume_change(volume);
    }
}
