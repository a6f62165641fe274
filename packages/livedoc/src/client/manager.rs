//! ConnectionManager: the single live link to one of the candidate
//! servers.
//!
//! An explicit event-driven state machine, not a chain of reconnect
//! callbacks. The pure core ([`Reconnector`]) owns the registry and the
//! attempt counter and answers connect/open/failure events with
//! directives — no timers, so every transition is unit-testable. The
//! async driver ([`ConnectionManager::run`]) executes directives: it
//! dials, owns at most one open WebSocket at any instant, pumps frames
//! through the codec into the session tracker, and emits [`ClientEvent`]s
//! to the channel handed in at construction. No globals — several
//! independent clients can coexist in one process.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ws::{self, ClientMessage};

use super::registry::ServerRegistry;
use super::session::{OpCategory, SessionTracker, SessionUpdate};

/// Link lifecycle. `Failed` is terminal: the attempt ceiling was
/// exhausted and only a fresh run retries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected { attempts: u32 },
    Connecting,
    Connected,
    Failed,
}

/// Reconnect tuning, from the `[client]` config section.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total connection attempts before the manager gives up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

/// Everything the layer above sees: link transitions plus per-session
/// updates folded by the tracker.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    State(LinkState),
    Update(SessionUpdate),
}

/// Synchronous failures of [`ClientHandle::send`]. There is no buffering
/// across disconnects; callers re-issue intents after reconnect.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected (link is {0:?})")]
    NotConnected(LinkState),

    #[error("outbound queue full")]
    Backpressure,

    #[error("connection manager stopped")]
    ManagerGone,
}

/// What a [`Reconnector`] event produced.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Directive {
    Dial { host: String, port: u16 },
    RetryAfter(Duration),
    GiveUp,
}

/// Pure reconnect core: registry + attempt counter, no I/O, no clocks.
pub(crate) struct Reconnector {
    registry: ServerRegistry,
    policy: RetryPolicy,
    attempts: u32,
    current: Option<(String, u16)>,
}

impl Reconnector {
    pub(crate) fn new(registry: ServerRegistry, policy: RetryPolicy) -> Self {
        Self {
            registry,
            policy,
            attempts: 0,
            current: None,
        }
    }

    /// Pick the endpoint for the next attempt.
    pub(crate) fn next_dial(&mut self) -> Option<Directive> {
        let endpoint = self.registry.select()?;
        let (host, port) = (endpoint.host.clone(), endpoint.port);
        self.current = Some((host.clone(), port));
        Some(Directive::Dial { host, port })
    }

    /// The transport opened: reset the counter, remember the endpoint
    /// as healthy.
    pub(crate) fn on_open(&mut self) {
        self.attempts = 0;
        if let Some((host, port)) = &self.current {
            self.registry.mark_healthy(host, *port);
        }
    }

    /// The transport failed or closed: demote the endpoint that failed
    /// so the other one is tried next, and count the attempt.
    pub(crate) fn on_failure(&mut self) -> Directive {
        if let Some((host, port)) = self.current.take() {
            self.registry.demote(&host, port);
        }
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            Directive::GiveUp
        } else {
            Directive::RetryAfter(self.policy.backoff)
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Cloneable sender side of a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ClientHandle {
    outbound: mpsc::Sender<ClientMessage>,
    state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Enqueue an envelope for the live connection.
    ///
    /// Fails synchronously when the link is not `Connected` — intents
    /// are never buffered across a disconnect.
    pub fn send(&self, msg: ClientMessage) -> Result<(), SendError> {
        let state = self.state.borrow().clone();
        if state != LinkState::Connected {
            return Err(SendError::NotConnected(state));
        }
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::ManagerGone,
        })
    }

    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Stop the manager; the run loop closes the socket and returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

enum DriveEnd {
    Cancelled,
    Lost(String),
}

/// Owns the reconnect loop and the single live transport.
pub struct ConnectionManager {
    reconnector: Reconnector,
    sessions: SessionTracker,
    events: mpsc::Sender<ClientEvent>,
    outbound_rx: mpsc::Receiver<ClientMessage>,
    state_tx: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Build a manager plus the handle upper layers keep.
    pub fn new(
        registry: ServerRegistry,
        policy: RetryPolicy,
        events: mpsc::Sender<ClientEvent>,
    ) -> (Self, ClientHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected { attempts: 0 });
        let cancel = CancellationToken::new();

        let handle = ClientHandle {
            outbound: outbound_tx,
            state: state_rx,
            cancel: cancel.clone(),
        };
        let manager = Self {
            reconnector: Reconnector::new(registry, policy),
            sessions: SessionTracker::new(),
            events,
            outbound_rx,
            state_tx,
            cancel,
        };
        (manager, handle)
    }

    /// Drive connect → connected → failover until cancelled or the
    /// attempt ceiling is reached. All transitions happen in this one
    /// task, so racing transport callbacks cannot double-demote an
    /// endpoint or open two sockets.
    pub async fn run(mut self) {
        loop {
            let Some(Directive::Dial { host, port }) = self.reconnector.next_dial() else {
                warn!("no endpoints configured, giving up");
                self.set_state(LinkState::Failed).await;
                return;
            };

            self.set_state(LinkState::Connecting).await;
            let url = format!("ws://{host}:{port}/ws");
            info!(%host, port, "connecting");

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = connect_async(&url) => result,
            };

            match connected {
                Ok((socket, _response)) => {
                    self.reconnector.on_open();
                    self.set_state(LinkState::Connected).await;
                    info!(%host, port, "connected");

                    match self.drive(socket).await {
                        DriveEnd::Cancelled => return,
                        DriveEnd::Lost(reason) => {
                            warn!(%host, port, %reason, "connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(%host, port, error = %e, "connect failed");
                }
            }

            // Entering Disconnected: every pending session is interrupted
            // and pruned; queued outbound intents are dropped, not
            // replayed on the next connection.
            let interrupted = self.sessions.interrupt_all();
            for update in interrupted {
                self.emit(ClientEvent::Update(update)).await;
            }
            while self.outbound_rx.try_recv().is_ok() {}

            match self.reconnector.on_failure() {
                Directive::RetryAfter(delay) => {
                    self.set_state(LinkState::Disconnected {
                        attempts: self.reconnector.attempts(),
                    })
                    .await;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Directive::GiveUp => {
                    warn!(
                        attempts = self.reconnector.attempts(),
                        "attempt ceiling reached, giving up"
                    );
                    self.set_state(LinkState::Failed).await;
                    return;
                }
                Directive::Dial { .. } => unreachable!("on_failure never dials"),
            }
        }
    }

    /// Pump one open socket until it closes, errors, or we shut down.
    async fn drive(&mut self, socket: WebSocketStream<MaybeTlsStream<TcpStream>>) -> DriveEnd {
        let (mut sink, mut stream) = socket.split();

        // Populate connection-health state right away.
        let started = self.sessions.begin(OpCategory::Stats);
        self.emit(ClientEvent::Update(started)).await;
        match ws::encode_client(&ClientMessage::GetStats) {
            Ok(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    return DriveEnd::Lost(e.to_string());
                }
            }
            Err(e) => warn!(error = %e, "failed to encode get_stats"),
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return DriveEnd::Cancelled;
                }

                outbound = self.outbound_rx.recv() => {
                    let Some(msg) = outbound else {
                        // Every handle dropped; nothing left to serve.
                        let _ = sink.send(Message::Close(None)).await;
                        return DriveEnd::Cancelled;
                    };
                    let started = self.sessions.begin(OpCategory::of(&msg));
                    self.emit(ClientEvent::Update(started)).await;

                    let text = match ws::encode_client(&msg) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "failed to encode outbound envelope");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return DriveEnd::Lost(e.to_string());
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match ws::decode_server(text.as_str()) {
                            Ok(msg) => {
                                for update in self.sessions.apply(&msg) {
                                    self.emit(ClientEvent::Update(update)).await;
                                }
                            }
                            // Protocol errors are logged and dropped; the
                            // connection stays open.
                            Err(e) => warn!(error = %e, "dropping inbound envelope"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            return DriveEnd::Lost(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return DriveEnd::Lost("server closed the connection".to_string());
                    }
                    Some(Ok(_)) => {
                        debug!("ignoring non-text frame");
                    }
                    Some(Err(e)) => return DriveEnd::Lost(e.to_string()),
                    None => return DriveEnd::Lost("stream ended".to_string()),
                }
            }
        }
    }

    async fn set_state(&mut self, state: LinkState) {
        let _ = self.state_tx.send(state.clone());
        self.emit(ClientEvent::State(state)).await;
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::registry::ServerRegistry;

    fn two_endpoint_reconnector(max_attempts: u32) -> Reconnector {
        let registry = ServerRegistry::new([
            ("p1".to_string(), 8080),
            ("p2".to_string(), 8081),
        ]);
        Reconnector::new(
            registry,
            RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn n_failures_below_ceiling_yield_n_plus_one_dials() {
        let max = 6;
        let failures = 3; // below the ceiling
        let mut r = two_endpoint_reconnector(max);

        let mut dials = 0;
        for _ in 0..failures {
            assert!(matches!(r.next_dial(), Some(Directive::Dial { .. })));
            dials += 1;
            assert!(matches!(r.on_failure(), Directive::RetryAfter(_)));
        }
        // The (N+1)th attempt succeeds.
        assert!(matches!(r.next_dial(), Some(Directive::Dial { .. })));
        dials += 1;
        r.on_open();

        assert_eq!(dials, failures + 1);
        assert_eq!(r.attempts(), 0); // reset on open
    }

    #[test]
    fn ceiling_produces_give_up() {
        let mut r = two_endpoint_reconnector(2);

        r.next_dial();
        assert!(matches!(r.on_failure(), Directive::RetryAfter(_)));
        r.next_dial();
        assert_eq!(r.on_failure(), Directive::GiveUp);
    }

    #[test]
    fn failures_alternate_between_two_endpoints() {
        let mut r = two_endpoint_reconnector(10);

        let hosts: Vec<String> = (0..4)
            .map(|_| {
                let Some(Directive::Dial { host, .. }) = r.next_dial() else {
                    panic!("expected dial");
                };
                r.on_failure();
                host
            })
            .collect();

        assert_eq!(hosts, vec!["p1", "p2", "p1", "p2"]);
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut r = two_endpoint_reconnector(3);

        r.next_dial();
        r.on_failure();
        r.next_dial();
        r.on_open();
        assert_eq!(r.attempts(), 0);

        // A later drop starts counting from zero again.
        assert!(matches!(r.on_failure(), Directive::RetryAfter(_)));
        assert_eq!(r.attempts(), 1);
    }

    #[test]
    fn empty_registry_cannot_dial() {
        let mut r = Reconnector::new(
            ServerRegistry::new([]),
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::ZERO,
            },
        );
        assert!(r.next_dial().is_none());
    }

    #[tokio::test]
    async fn send_fails_synchronously_when_not_connected() {
        let registry = ServerRegistry::new([("127.0.0.1".to_string(), 1)]);
        let (events_tx, _events_rx) = mpsc::channel(64);
        let (_manager, handle) = ConnectionManager::new(
            registry,
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
            events_tx,
        );

        let err = handle.send(ClientMessage::GetStats).unwrap_err();
        assert!(matches!(err, SendError::NotConnected(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoints_end_in_failed_state() {
        // Port 1 on localhost refuses immediately.
        let registry = ServerRegistry::new([
            ("127.0.0.1".to_string(), 1),
            ("127.0.0.1".to_string(), 1),
        ]);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let (manager, handle) = ConnectionManager::new(
            registry,
            RetryPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
            events_tx,
        );
        let task = tokio::spawn(manager.run());

        let mut connecting = 0;
        let mut last = None;
        while let Some(event) = events_rx.recv().await {
            if let ClientEvent::State(state) = event {
                if state == LinkState::Connecting {
                    connecting += 1;
                }
                last = Some(state);
            }
        }

        // Exactly `max_attempts` dials, then terminal Failed.
        assert_eq!(connecting, 2);
        assert_eq!(last, Some(LinkState::Failed));
        assert_eq!(handle.state(), LinkState::Failed);
        task.await.unwrap();
    }
}
