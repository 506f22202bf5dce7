//! Reconnecting duplex message channel
//!
//! Wraps a WebSocket-like transport behind the [`WireSocket`] /
//! [`WireConnector`] traits so the engine is testable against an in-memory
//! socket. After any non-clean close or error the channel immediately tries
//! to connect again (no backoff). Delivery is never assumed reliable:
//! messages may be lost outright, and `send` is a no-op on the wire when
//! disconnected. The caller gets an error so its rollback path can run,
//! but nothing is queued or retried.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chime_common::{ClientCommand, Error, Result, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Receive-side events delivered to the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A parsed inbound message
    Message(ServerMessage),
    /// Channel is up. `reconnect` is false only for the first connect of a
    /// session; on reconnect the reconciler must request a fresh resync
    /// rather than assume continuity.
    Connected { reconnect: bool },
    /// Channel dropped; reconnection is already underway
    Disconnected,
}

/// One live connection: text frames in both directions.
pub trait WireSocket: Send {
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Next inbound text frame. `None` means the peer closed cleanly.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;
}

/// Factory for connections; called again after every close or error.
pub trait WireConnector: Send + 'static {
    type Socket: WireSocket + 'static;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Socket>> + Send;
}

enum Outbound {
    Frame(String),
    Close,
}

/// Cloneable handle to a spawned transport task.
#[derive(Clone)]
pub struct TransportHandle {
    out_tx: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl TransportHandle {
    /// Serialize and send a command over the live connection.
    ///
    /// Errors (without queueing) when the channel is down; callers roll back
    /// their optimistic update instead of assuming delivery.
    pub fn send(&self, command: &ClientCommand) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            debug!(?command, "dropping outbound command: channel not connected");
            return Err(Error::Transport("channel not connected".into()));
        }
        let text = serde_json::to_string(command)?;
        self.out_tx
            .send(Outbound::Frame(text))
            .map_err(|_| Error::Transport("channel task ended".into()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Shut the channel down for good (no reconnect follows).
    pub fn close(&self) {
        let _ = self.out_tx.send(Outbound::Close);
    }
}

/// Reconnecting channel over any [`WireConnector`].
pub struct TransportChannel;

impl TransportChannel {
    /// Spawn the channel task. Inbound events arrive on `event_tx`; the
    /// returned handle is the send side.
    pub fn spawn<C: WireConnector>(
        connector: C,
        event_tx: mpsc::UnboundedSender<ChannelEvent>,
    ) -> TransportHandle {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let handle = TransportHandle {
            out_tx,
            connected: Arc::clone(&connected),
        };
        tokio::spawn(run_channel(connector, event_tx, out_rx, connected));
        handle
    }
}

async fn run_channel<C: WireConnector>(
    mut connector: C,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    connected: Arc<AtomicBool>,
) {
    let mut ever_connected = false;
    loop {
        if event_tx.is_closed() {
            return;
        }
        let mut socket = match connector.connect().await {
            Ok(socket) => socket,
            Err(e) => {
                debug!(error = %e, "connect attempt failed, retrying");
                // Immediate retry; yield so a persistently-down server
                // cannot starve the runtime.
                tokio::task::yield_now().await;
                continue;
            }
        };

        connected.store(true, Ordering::Release);
        info!(reconnect = ever_connected, "channel connected");
        let _ = event_tx.send(ChannelEvent::Connected {
            reconnect: ever_connected,
        });
        ever_connected = true;

        loop {
            tokio::select! {
                outbound = out_rx.recv() => match outbound {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = socket.send(text).await {
                            warn!(error = %e, "send failed, dropping connection");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        info!("channel closed by client");
                        connected.store(false, Ordering::Release);
                        return;
                    }
                },
                inbound = socket.recv() => match inbound {
                    Some(Ok(text)) => dispatch_frame(&text, &event_tx),
                    Some(Err(e)) => {
                        warn!(error = %e, "receive failed, reconnecting");
                        break;
                    }
                    None => {
                        info!("server closed connection, reconnecting");
                        break;
                    }
                },
            }
        }

        connected.store(false, Ordering::Release);
        let _ = event_tx.send(ChannelEvent::Disconnected);
    }
}

fn dispatch_frame(text: &str, event_tx: &mpsc::UnboundedSender<ChannelEvent>) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => {
            let _ = event_tx.send(ChannelEvent::Message(message));
        }
        Err(e) => {
            // Unknown or malformed frames are dropped; the protocol already
            // tolerates silent gaps.
            warn!(error = %e, "dropping unparseable inbound frame");
        }
    }
}

/// Default connector: a `tokio-tungstenite` WebSocket client.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl WireConnector for WsConnector {
    type Socket = WsSocket;

    async fn connect(&mut self) -> Result<WsSocket> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(WsSocket { inner: stream })
    }
}

pub struct WsSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WireSocket for WsSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.inner.send(Message::Pong(payload)).await {
                        return Some(Err(Error::Transport(e.to_string())));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue, // binary/pong frames are not part of the protocol
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout, Duration};

    /// Scripted in-memory socket: each connect pops the next script entry.
    struct FakeSocket {
        frames: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
        /// Keep the "connection" open after the script runs out
        hold_open: bool,
    }

    impl WireSocket for FakeSocket {
        async fn send(&mut self, text: String) -> Result<()> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            if let Some(frame) = self.frames.pop_front() {
                return Some(Ok(frame));
            }
            if self.hold_open {
                // Pretend the peer has gone quiet
                loop {
                    sleep(Duration::from_secs(60)).await;
                }
            }
            None
        }
    }

    struct FakeConnector {
        scripts: VecDeque<Vec<String>>,
        sent: Arc<Mutex<Vec<String>>>,
        hold_open_last: bool,
    }

    impl WireConnector for FakeConnector {
        type Socket = FakeSocket;

        async fn connect(&mut self) -> Result<FakeSocket> {
            match self.scripts.pop_front() {
                Some(frames) => Ok(FakeSocket {
                    frames: frames.into(),
                    sent: Arc::clone(&self.sent),
                    hold_open: self.hold_open_last && self.scripts.is_empty(),
                }),
                None => {
                    // No further connections scripted; park forever
                    loop {
                        sleep(Duration::from_secs(60)).await;
                    }
                }
            }
        }
    }

    fn state_frame(timestamp: i64) -> String {
        format!(
            r#"{{"type":"state","payload":{{"currentTrackId":"t","playing":true,"currentTime":1.0,"timestamp":{timestamp}}}}}"#
        )
    }

    #[tokio::test]
    async fn test_reconnect_is_flagged_on_second_connect() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = FakeConnector {
            scripts: VecDeque::from(vec![vec![state_frame(1)], vec![state_frame(2)]]),
            sent,
            hold_open_last: true,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = TransportChannel::spawn(connector, tx);

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::Connected { reconnect: false }
        );
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Message(_)));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Disconnected);
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::Connected { reconnect: true }
        );
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Message(_)));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped_silently() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = FakeConnector {
            scripts: VecDeque::from(vec![vec![
                "{not json".to_string(),
                r#"{"type":"martian"}"#.to_string(),
                state_frame(3),
            ]]),
            sent,
            hold_open_last: true,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = TransportChannel::spawn(connector, tx);

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::Connected { reconnect: false }
        );
        // Only the valid frame survives
        let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, ChannelEvent::Message(ServerMessage::State(_))));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_an_error_not_a_queue() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_probe = Arc::clone(&sent);
        let connector = FakeConnector {
            scripts: VecDeque::new(), // never connects
            sent,
            hold_open_last: false,
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = TransportChannel::spawn(connector, tx);

        let err = handle.send(&ClientCommand::TogglePlayback).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        sleep(Duration::from_millis(50)).await;
        assert!(sent_probe.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_connected_reaches_the_socket() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_probe = Arc::clone(&sent);
        let connector = FakeConnector {
            scripts: VecDeque::from(vec![vec![]]),
            sent,
            hold_open_last: true,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TransportChannel::spawn(connector, tx);

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::Connected { reconnect: false }
        );
        handle.send(&ClientCommand::Next).unwrap();

        sleep(Duration::from_millis(50)).await;
        let sent = sent_probe.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("next"));
    }
}
