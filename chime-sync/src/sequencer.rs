//! Inbound message ordering
//!
//! Server pushes can arrive in bursts, and two state snapshots applied
//! concurrently (or out of priority order) show up to the user as the song
//! flipping back to the previous one for a moment. The sequencer tags each
//! arriving message with an arrival sequence number and serializes
//! processing: full-state snapshots always drain ahead of trigger messages,
//! earlier arrivals ahead of later ones within a kind, and the handler for
//! message N runs to completion before message N+1 is handed out.

use std::collections::VecDeque;

use chime_common::ServerMessage;
use tokio::sync::mpsc;
use tracing::trace;

use crate::transport::ChannelEvent;

/// A message tagged with its arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced {
    pub seq: u64,
    pub message: ServerMessage,
}

/// Two-lane priority queue over arrival order.
///
/// Full-state snapshots occupy the priority lane; everything else queues
/// behind them regardless of arrival interleaving.
#[derive(Debug, Default)]
pub struct SequencedQueue {
    next_seq: u64,
    full_state: VecDeque<Sequenced>,
    other: VecDeque<Sequenced>,
}

impl SequencedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ServerMessage) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let item = Sequenced { seq, message };
        trace!(seq, full_state = item.message.is_full_state(), "queued inbound message");
        if item.message.is_full_state() {
            self.full_state.push_back(item);
        } else {
            self.other.push_back(item);
        }
    }

    /// Next message to process: full-state lane first, FIFO within a lane.
    pub fn pop(&mut self) -> Option<Sequenced> {
        self.full_state.pop_front().or_else(|| self.other.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.full_state.is_empty() && self.other.is_empty()
    }

    pub fn len(&self) -> usize {
        self.full_state.len() + self.other.len()
    }
}

/// What the engine loop sees after sequencing.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencedEvent {
    /// Apply this message; the caller must finish before asking for more
    Message(Sequenced),
    /// Channel (re)connected; `reconnect` is false for the first connect
    Connected { reconnect: bool },
    /// Channel dropped; a reconnect attempt is already underway
    Disconnected,
    /// Transport task ended; no more events will arrive
    Closed,
}

/// Serializes inbound channel events for the reconciler.
///
/// Owns the receive side of the transport. Control events (connect /
/// disconnect) bypass the lanes and are delivered in-line.
pub struct MessageSequencer {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    queue: SequencedQueue,
}

impl MessageSequencer {
    pub fn new(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self {
            rx,
            queue: SequencedQueue::new(),
        }
    }

    /// Next event to process.
    ///
    /// Drains everything already sitting in the channel into the priority
    /// lanes before handing anything out, so a burst of pushes is reordered
    /// (full state first) rather than applied in raw arrival order. Returns
    /// one item at a time; because the caller awaits its handler before
    /// calling `next()` again, at most one application is ever in flight.
    pub async fn next(&mut self) -> SequencedEvent {
        loop {
            // Fold any burst currently in the channel into the lanes
            loop {
                match self.rx.try_recv() {
                    Ok(ChannelEvent::Message(msg)) => self.queue.push(msg),
                    Ok(ChannelEvent::Connected { reconnect }) => {
                        return SequencedEvent::Connected { reconnect }
                    }
                    Ok(ChannelEvent::Disconnected) => return SequencedEvent::Disconnected,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        // Drain what we already queued before reporting closure
                        if let Some(item) = self.queue.pop() {
                            return SequencedEvent::Message(item);
                        }
                        return SequencedEvent::Closed;
                    }
                }
            }

            if let Some(item) = self.queue.pop() {
                return SequencedEvent::Message(item);
            }

            match self.rx.recv().await {
                Some(ChannelEvent::Message(msg)) => self.queue.push(msg),
                Some(ChannelEvent::Connected { reconnect }) => {
                    return SequencedEvent::Connected { reconnect }
                }
                Some(ChannelEvent::Disconnected) => return SequencedEvent::Disconnected,
                None => return SequencedEvent::Closed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_common::{ServerMessage, ServerState};

    fn state(timestamp: i64) -> ServerMessage {
        ServerMessage::State(ServerState {
            current_track_id: Some("1".into()),
            title: None,
            artist: None,
            playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 0.0,
            shuffle_mode: Default::default(),
            repeat_mode: Default::default(),
            queue: vec![],
            timestamp,
        })
    }

    #[test]
    fn test_full_state_jumps_ahead_of_triggers() {
        let mut q = SequencedQueue::new();
        q.push(ServerMessage::QueueUpdate);
        q.push(ServerMessage::HistoryUpdate);
        q.push(state(1));

        assert!(q.pop().unwrap().message.is_full_state());
        assert_eq!(q.pop().unwrap().message, ServerMessage::QueueUpdate);
        assert_eq!(q.pop().unwrap().message, ServerMessage::HistoryUpdate);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_fifo_within_a_lane() {
        let mut q = SequencedQueue::new();
        q.push(state(1));
        q.push(state(2));
        let first = q.pop().unwrap();
        let second = q.pop().unwrap();
        assert!(first.seq < second.seq);
    }

    #[test]
    fn test_sequence_numbers_reflect_arrival_not_priority() {
        let mut q = SequencedQueue::new();
        q.push(ServerMessage::QueueUpdate); // seq 0
        q.push(state(1)); // seq 1
        let first = q.pop().unwrap();
        assert_eq!(first.seq, 1); // state processed first despite later arrival
    }

    #[tokio::test]
    async fn test_burst_is_reordered_before_delivery() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sequencer = MessageSequencer::new(rx);

        tx.send(ChannelEvent::Message(ServerMessage::QueueUpdate)).unwrap();
        tx.send(ChannelEvent::Message(state(10))).unwrap();
        drop(tx);

        let first = sequencer.next().await;
        let SequencedEvent::Message(item) = first else {
            panic!("expected message");
        };
        assert!(item.message.is_full_state());

        let second = sequencer.next().await;
        let SequencedEvent::Message(item) = second else {
            panic!("expected message");
        };
        assert_eq!(item.message, ServerMessage::QueueUpdate);

        assert_eq!(sequencer.next().await, SequencedEvent::Closed);
    }

    #[tokio::test]
    async fn test_control_events_bypass_the_lanes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sequencer = MessageSequencer::new(rx);

        tx.send(ChannelEvent::Connected { reconnect: true }).unwrap();
        tx.send(ChannelEvent::Message(state(1))).unwrap();

        assert_eq!(
            sequencer.next().await,
            SequencedEvent::Connected { reconnect: true }
        );
        let SequencedEvent::Message(item) = sequencer.next().await else {
            panic!("expected message");
        };
        assert!(item.message.is_full_state());
    }
}
