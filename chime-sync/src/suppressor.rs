//! Echo suppression for optimistic local actions
//!
//! When the user toggles play/pause the UI updates immediately and a command
//! goes to the server. The server's broadcast of the resulting state comes
//! back shortly after; reapplying it is harmless when consistent, but if a
//! second device raced a conflicting command the blind reapply shows up as a
//! visible double-toggle. The suppressor remembers "this client just did X"
//! for a short window so matching inbound echoes can be ignored for the
//! affected field only.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default suppression window for play/pause echoes
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_millis(3000);

/// Most records kept at once; oldest evicted beyond this
const MAX_RECORDS: usize = 16;

/// Local action kinds subject to echo suppression.
///
/// Only the play/pause boolean is suppressed today; the enum keeps the
/// window typed rather than stringly keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    PlayPause,
}

#[derive(Debug, Clone)]
struct ActionRecord {
    kind: ActionKind,
    occurred_at: Instant,
}

/// Short-lived memory of just-performed local actions.
#[derive(Debug)]
pub struct ActionSuppressor {
    window: Duration,
    records: VecDeque<ActionRecord>,
}

impl ActionSuppressor {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SUPPRESSION_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            records: VecDeque::new(),
        }
    }

    /// Record that this client just performed `kind`.
    pub fn record(&mut self, kind: ActionKind) {
        self.record_at(kind, Instant::now());
    }

    /// Record with an explicit timestamp (deterministic tests).
    pub fn record_at(&mut self, kind: ActionKind, at: Instant) {
        if self.records.len() >= MAX_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(ActionRecord {
            kind,
            occurred_at: at,
        });
    }

    /// Should an inbound echo of `kind` be suppressed right now?
    ///
    /// Prunes expired records as a side effect.
    pub fn should_suppress(&mut self, kind: ActionKind) -> bool {
        self.should_suppress_at(kind, Instant::now())
    }

    /// Suppression check with an explicit "now" (deterministic tests).
    pub fn should_suppress_at(&mut self, kind: ActionKind, now: Instant) -> bool {
        let window = self.window;
        self.records
            .retain(|r| now.duration_since(r.occurred_at) < window);
        let suppress = self.records.iter().any(|r| r.kind == kind);
        if suppress {
            debug!(?kind, "suppressing inbound echo of recent local action");
        }
        suppress
    }
}

impl Default for ActionSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppresses_within_window() {
        let mut sup = ActionSuppressor::new();
        let t0 = Instant::now();
        sup.record_at(ActionKind::PlayPause, t0);

        assert!(sup.should_suppress_at(ActionKind::PlayPause, t0));
        assert!(sup.should_suppress_at(ActionKind::PlayPause, t0 + Duration::from_millis(2999)));
    }

    #[test]
    fn test_expires_at_window_boundary() {
        let mut sup = ActionSuppressor::new();
        let t0 = Instant::now();
        sup.record_at(ActionKind::PlayPause, t0);

        assert!(!sup.should_suppress_at(ActionKind::PlayPause, t0 + Duration::from_millis(3000)));
        // Expired record was pruned, not just ignored
        assert!(!sup.should_suppress_at(ActionKind::PlayPause, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_no_record_means_no_suppression() {
        let mut sup = ActionSuppressor::new();
        assert!(!sup.should_suppress_at(ActionKind::PlayPause, Instant::now()));
    }

    #[test]
    fn test_repeated_actions_extend_the_window() {
        let mut sup = ActionSuppressor::new();
        let t0 = Instant::now();
        sup.record_at(ActionKind::PlayPause, t0);
        sup.record_at(ActionKind::PlayPause, t0 + Duration::from_millis(2000));

        // First record expired, second still active
        assert!(sup.should_suppress_at(ActionKind::PlayPause, t0 + Duration::from_millis(4000)));
        assert!(!sup.should_suppress_at(ActionKind::PlayPause, t0 + Duration::from_millis(5100)));
    }

    #[test]
    fn test_record_list_is_bounded() {
        let mut sup = ActionSuppressor::new();
        let t0 = Instant::now();
        for i in 0..100 {
            sup.record_at(ActionKind::PlayPause, t0 + Duration::from_millis(i));
        }
        assert!(sup.records.len() <= MAX_RECORDS);
    }
}
