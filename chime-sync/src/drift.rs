//! Drift correction toward the authority's extrapolated timeline
//!
//! While a track is playing, the local media position slowly diverges from
//! the server's clock (decoder scheduling, network latency on the original
//! position report). The corrector keeps an exponentially smoothed offset
//! and nudges local playback by at most ±300 ms per tick, small enough to be
//! inaudible while still converging multiple devices within a few ticks.

use std::time::Duration;

/// Cadence at which drift ticks run while playing
pub const DRIFT_TICK_INTERVAL: Duration = Duration::from_millis(300);

/// Smoothing factor applied to each new raw drift observation
const SMOOTHING: f64 = 0.4;

/// Largest position change permitted in a single tick (seconds)
const MAX_STEP_SECS: f64 = 0.300;

/// Offsets at or below this magnitude are left alone (seconds)
const DEADBAND_SECS: f64 = 0.010;

/// Exponentially smoothed drift model.
///
/// Pure arithmetic; the engine loop owns the cadence and the gating
/// (playing, not dragging, engine buffered enough to seek).
#[derive(Debug, Default)]
pub struct DriftModel {
    offset: f64,
}

impl DriftModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a raw drift observation (seconds) into the smoothed offset.
    ///
    /// `raw_drift = extrapolated_server_position - local_media_position`.
    pub fn observe(&mut self, raw_drift: f64) -> f64 {
        self.offset = self.offset * (1.0 - SMOOTHING) + raw_drift * SMOOTHING;
        self.offset
    }

    /// Correction to apply this tick, if any.
    ///
    /// Clamped to ±300 ms; `None` inside the ±10 ms deadband.
    pub fn correction(&self) -> Option<f64> {
        if self.offset.abs() <= DEADBAND_SECS {
            return None;
        }
        Some(self.offset.clamp(-MAX_STEP_SECS, MAX_STEP_SECS))
    }

    /// Forget accumulated offset (track change, seek, reconnect).
    pub fn reset(&mut self) {
        self.offset = 0.0;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

/// Extrapolate where the authority's position is "now".
///
/// `server_position` was true at `server_timestamp_millis`; playback has
/// advanced since.
pub fn extrapolate_server_position(
    server_position: f64,
    server_timestamp_millis: i64,
    now_millis: i64,
) -> f64 {
    let elapsed = (now_millis - server_timestamp_millis).max(0) as f64 / 1000.0;
    server_position + elapsed
}
