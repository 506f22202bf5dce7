//! Engine wiring and owning task
//!
//! `SyncEngine::spawn` connects the transport task, the sequencer, and the
//! reconciler, and runs the single select loop that owns the playback
//! view: sequenced inbound messages, media engine signals, user actions
//! from the cloneable [`SyncHandle`], and the drift cadence all join here,
//! so there is never more than one writer.

use std::path::PathBuf;
use std::time::Duration;

use chime_common::time::now_millis;
use chime_common::{ClientCommand, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::drift::DRIFT_TICK_INTERVAL;
use crate::media::{MediaEngine, MediaEvent, MediaEventSender};
use crate::reconciler::{EngineEvent, PlaybackReconciler, SkipDirection};
use crate::resync::ResyncClient;
use crate::sequencer::{MessageSequencer, SequencedEvent};
use crate::store::DeviceStore;
use crate::transport::{TransportChannel, TransportHandle, WireConnector, WsConnector};

/// Capacity of the UI event bus
const EVENT_BUS_CAPACITY: usize = 100;

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket URL of the server authority's push channel
    pub ws_url: String,
    /// Base HTTP URL for the reconnect-time full-state fetch; `None`
    /// disables the fetch (the `requestState` command still goes out)
    pub rest_base_url: Option<String>,
    /// Override for the device store directory (defaults to the platform
    /// data dir)
    pub data_dir: Option<PathBuf>,
    /// Override for the play/pause echo suppression window
    pub suppression_window: Option<Duration>,
}

impl EngineConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            rest_base_url: None,
            data_dir: None,
            suppression_window: None,
        }
    }
}

/// User actions forwarded into the engine loop.
#[derive(Debug, Clone)]
enum UserAction {
    TogglePlayPause,
    Seek(f64),
    VolumeChange(f64),
    Skip(SkipDirection),
    CycleShuffle,
    CycleRepeat,
    Enqueue(String),
    BeginSeekDrag,
    UpdateSeekDrag(f64),
    EndSeekDrag(f64),
    BeginVolumeDrag,
    UpdateVolumeDrag(f64),
    EndVolumeDrag(f64),
    Shutdown,
}

/// Create the channel a [`MediaEngine`] implementation reports through.
pub fn media_event_channel() -> (MediaEventSender, mpsc::UnboundedReceiver<MediaEvent>) {
    mpsc::unbounded_channel()
}

/// Cloneable front door for hosting UIs.
#[derive(Clone)]
pub struct SyncHandle {
    action_tx: mpsc::UnboundedSender<UserAction>,
    events: broadcast::Sender<EngineEvent>,
}

impl SyncHandle {
    /// Subscribe to engine notifications (view changes, notices, transport
    /// state).
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn toggle_play_pause(&self) {
        self.send(UserAction::TogglePlayPause);
    }

    pub fn seek(&self, seconds: f64) {
        self.send(UserAction::Seek(seconds));
    }

    pub fn set_volume(&self, volume: f64) {
        self.send(UserAction::VolumeChange(volume));
    }

    pub fn skip(&self, direction: SkipDirection) {
        self.send(UserAction::Skip(direction));
    }

    pub fn cycle_shuffle(&self) {
        self.send(UserAction::CycleShuffle);
    }

    pub fn cycle_repeat(&self) {
        self.send(UserAction::CycleRepeat);
    }

    pub fn enqueue(&self, track_id: impl Into<String>) {
        self.send(UserAction::Enqueue(track_id.into()));
    }

    pub fn begin_seek_drag(&self) {
        self.send(UserAction::BeginSeekDrag);
    }

    pub fn update_seek_drag(&self, seconds: f64) {
        self.send(UserAction::UpdateSeekDrag(seconds));
    }

    pub fn end_seek_drag(&self, seconds: f64) {
        self.send(UserAction::EndSeekDrag(seconds));
    }

    pub fn begin_volume_drag(&self) {
        self.send(UserAction::BeginVolumeDrag);
    }

    pub fn update_volume_drag(&self, volume: f64) {
        self.send(UserAction::UpdateVolumeDrag(volume));
    }

    pub fn end_volume_drag(&self, volume: f64) {
        self.send(UserAction::EndVolumeDrag(volume));
    }

    /// Stop the engine, persisting a final snapshot.
    pub fn shutdown(&self) {
        self.send(UserAction::Shutdown);
    }

    fn send(&self, action: UserAction) {
        // Engine gone means shutdown already happened; nothing to surface
        let _ = self.action_tx.send(action);
    }
}

/// The assembled sync engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Spawn the engine against the default WebSocket transport.
    pub fn spawn<M>(
        config: EngineConfig,
        media: M,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Result<SyncHandle>
    where
        M: MediaEngine + 'static,
    {
        let connector = WsConnector::new(config.ws_url.clone());
        Self::spawn_with(config, connector, media, media_rx)
    }

    /// Spawn with a custom transport connector (embedded hosts, tests).
    pub fn spawn_with<M, C>(
        config: EngineConfig,
        connector: C,
        media: M,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Result<SyncHandle>
    where
        M: MediaEngine + 'static,
        C: WireConnector,
    {
        let store = match &config.data_dir {
            Some(dir) => DeviceStore::open_at(dir)?,
            None => DeviceStore::open()?,
        };

        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let transport = TransportChannel::spawn(connector, channel_tx);
        let sequencer = MessageSequencer::new(channel_rx);

        let mut reconciler =
            PlaybackReconciler::new(media, transport.clone(), store, events.clone());
        if let Some(window) = config.suppression_window {
            reconciler.set_suppression_window(window);
        }

        let resync = config.rest_base_url.as_deref().map(ResyncClient::new);
        let (action_tx, action_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_engine(
            reconciler, sequencer, media_rx, action_rx, resync, transport,
        ));

        Ok(SyncHandle { action_tx, events })
    }
}

async fn run_engine<M: MediaEngine>(
    mut reconciler: PlaybackReconciler<M, TransportHandle>,
    mut sequencer: MessageSequencer,
    mut media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    mut action_rx: mpsc::UnboundedReceiver<UserAction>,
    resync: Option<ResyncClient>,
    transport: TransportHandle,
) {
    reconciler.restore_startup_snapshot(now_millis());

    let mut drift = tokio::time::interval(DRIFT_TICK_INTERVAL);
    drift.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut media_alive = true;

    loop {
        tokio::select! {
            event = sequencer.next() => match event {
                SequencedEvent::Message(item) => match item.message {
                    chime_common::ServerMessage::State(state) => {
                        reconciler.apply_server_state(state);
                    }
                    // Trigger-only kinds: external collaborators refetch
                    other => reconciler.forward_trigger(&other),
                },
                SequencedEvent::Connected { reconnect } => {
                    reconciler.set_transport_up(true);
                    if reconnect {
                        handle_reconnect(&mut reconciler, resync.as_ref(), &transport).await;
                    }
                }
                SequencedEvent::Disconnected => {
                    reconciler.set_transport_up(false);
                }
                SequencedEvent::Closed => {
                    info!("transport task ended, stopping engine");
                    break;
                }
            },
            media_event = media_rx.recv(), if media_alive => match media_event {
                Some(event) => reconciler.handle_media_event(event),
                None => media_alive = false,
            },
            action = action_rx.recv() => match action {
                Some(UserAction::Shutdown) | None => break,
                Some(action) => dispatch_action(&mut reconciler, action),
            },
            _ = drift.tick() => {
                reconciler.drift_tick(now_millis());
            }
        }
    }

    reconciler.persist_snapshot();
    transport.close();
    info!("sync engine stopped");
}

/// Reconnect resync: the channel carries no history, so fetch the
/// authority's current state and let last-applied-wins arbitrate; also ask
/// for a fresh push for every connected client.
async fn handle_reconnect<M: MediaEngine>(
    reconciler: &mut PlaybackReconciler<M, TransportHandle>,
    resync: Option<&ResyncClient>,
    transport: &TransportHandle,
) {
    if let Err(e) = transport.send(&ClientCommand::RequestState) {
        warn!(error = %e, "state re-push request not delivered");
    }
    if let Some(client) = resync {
        match client.fetch_state().await {
            // Staleness arbitration happens inside apply_server_state: a
            // fetch older than what we already hold is ignored
            Ok(state) => reconciler.apply_server_state(state),
            Err(e) => warn!(error = %e, "full-state fetch after reconnect failed"),
        }
    }
}

fn dispatch_action<M: MediaEngine>(
    reconciler: &mut PlaybackReconciler<M, TransportHandle>,
    action: UserAction,
) {
    match action {
        UserAction::TogglePlayPause => reconciler.issue_play_pause_toggle(),
        UserAction::Seek(seconds) => reconciler.issue_seek(seconds),
        UserAction::VolumeChange(volume) => reconciler.issue_volume_change(volume),
        UserAction::Skip(direction) => reconciler.issue_skip(direction),
        UserAction::CycleShuffle => reconciler.issue_shuffle_cycle(),
        UserAction::CycleRepeat => reconciler.issue_repeat_cycle(),
        UserAction::Enqueue(track_id) => reconciler.issue_enqueue(track_id),
        UserAction::BeginSeekDrag => reconciler.begin_seek_drag(),
        UserAction::UpdateSeekDrag(seconds) => reconciler.update_seek_drag(seconds),
        UserAction::EndSeekDrag(seconds) => reconciler.end_seek_drag(seconds),
        UserAction::BeginVolumeDrag => reconciler.begin_volume_drag(),
        UserAction::UpdateVolumeDrag(volume) => reconciler.update_volume_drag(volume),
        UserAction::EndVolumeDrag(volume) => reconciler.end_volume_drag(volume),
        UserAction::Shutdown => unreachable!("handled in the select loop"),
    }
}
