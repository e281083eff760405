//! ==============================================================================
//! connection.rs - websocket lifecycle and reconnection
//! ==============================================================================
//!
//! purpose:
//!     owns the one socket to the board. a single task walks the lifecycle
//!
//!         Connecting ──► Open ──► Closed ──(fixed delay)──► Connecting ...
//!
//!     so there is never more than one live socket and reconnect attempts can
//!     not overlap. retries are unbounded with a constant delay: the board is
//!     a LAN device that gets power-cycled, and the panel should simply come
//!     back when it does.
//!
//! relationships:
//!     - used by: main.rs (creates the manager, starts it once)
//!     - dispatches to: sync.rs (ConnectionEvents implementation)
//!     - hands out: Connection handles (send-only view of the socket)
//!
//! ==============================================================================

use crate::protocol::Command;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// result of a fire-and-forget send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// socket not open; the command is gone, nothing is queued
    Dropped,
}

// ==============================================================================
// transport
// ==============================================================================

/// an open socket, as a pair of text channels.
/// the session is over once `inbound` yields `None`.
pub struct Session {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Session>> + Send;
}

/// real transport: tokio-tungstenite text frames
pub struct WsConnector {
    /// upper bound on tcp connect + handshake; a powered-off board would
    /// otherwise hold an attempt for the os connect timeout
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Session> {
        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    anyhow!("timed out after {}ms connecting to {}", self.connect_timeout.as_millis(), url)
                })?
                .with_context(|| format!("failed to connect to {}", url))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!("[WS] write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    // binary, ping and pong frames carry nothing for the panel
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("[WS] read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Session { outbound: out_tx, inbound: in_rx })
    }
}

// ==============================================================================
// event dispatch
// ==============================================================================

/// handlers for the three socket events; registered once via `start`.
/// called from the connection task, one at a time, in arrival order.
pub trait ConnectionEvents: Send + Sync + 'static {
    fn on_open(&self);
    fn on_close(&self);
    fn on_message(&self, payload: &str);
}

// ==============================================================================
// connection handle
// ==============================================================================

type SharedSender = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

fn lock(sender: &SharedSender) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
    sender.lock().unwrap_or_else(PoisonError::into_inner)
}

/// send side of the socket. cheap to clone; never blocks.
#[derive(Clone)]
pub struct Connection {
    outbound: SharedSender,
    state: watch::Receiver<ConnectionState>,
    dropped: Arc<AtomicU64>,
}

impl Connection {
    pub fn send(&self, command: &Command) -> SendOutcome {
        let payload = command.encode();
        let guard = lock(&self.outbound);
        if let Some(tx) = guard.as_ref() {
            if tx.send(payload).is_ok() {
                return SendOutcome::Sent;
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[WS] not connected, dropped {:?}", command);
        SendOutcome::Dropped
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// commands lost because the socket was not open
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

// ==============================================================================
// manager
// ==============================================================================

pub struct ConnectionManager<C: Connector> {
    url: String,
    reconnect_delay: Duration,
    connector: Arc<C>,
    outbound: SharedSender,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    dropped: Arc<AtomicU64>,
    started: AtomicBool,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, connector: Arc<C>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        Self {
            url: url.into(),
            reconnect_delay,
            connector,
            outbound: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            state_rx,
            dropped: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> Connection {
        Connection {
            outbound: self.outbound.clone(),
            state: self.state_rx.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// spawn the connection task. only the first call does anything.
    pub fn start(&self, events: Arc<dyn ConnectionEvents>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("[WS] start() called again, ignoring");
            return false;
        }

        let task = ConnectionTask {
            url: self.url.clone(),
            reconnect_delay: self.reconnect_delay,
            connector: self.connector.clone(),
            outbound: self.outbound.clone(),
            state_tx: self.state_tx.clone(),
            events,
        };
        tokio::spawn(task.run());
        true
    }
}

struct ConnectionTask<C: Connector> {
    url: String,
    reconnect_delay: Duration,
    connector: Arc<C>,
    outbound: SharedSender,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events: Arc<dyn ConnectionEvents>,
}

impl<C: Connector> ConnectionTask<C> {
    async fn run(self) {
        loop {
            self.state_tx.send_replace(ConnectionState::Connecting);
            tracing::debug!("[WS] connecting to {}", self.url);

            match self.connector.connect(&self.url).await {
                Ok(Session { outbound, mut inbound }) => {
                    // sender goes in before anyone can observe Open
                    *lock(&self.outbound) = Some(outbound);
                    self.state_tx.send_replace(ConnectionState::Open);
                    tracing::info!("[WS] Connection opened ({})", self.url);
                    self.events.on_open();

                    while let Some(payload) = inbound.recv().await {
                        self.events.on_message(&payload);
                    }

                    *lock(&self.outbound) = None;
                }
                Err(e) => {
                    tracing::debug!("[WS] {:#}", e);
                }
            }

            tracing::warn!(
                "[WS] Connection closed, reconnecting in {}ms",
                self.reconnect_delay.as_millis()
            );
            self.events.on_close();
            self.state_tx.send_replace(ConnectionState::Closed);

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}


// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;
    use crate::protocol::ButtonId;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl ConnectionEvents for Recorder {
        fn on_open(&self) {
            self.log.lock().unwrap().push("open".into());
        }
        fn on_close(&self) {
            self.log.lock().unwrap().push("close".into());
        }
        fn on_message(&self, payload: &str) {
            self.log.lock().unwrap().push(format!("msg:{}", payload));
        }
    }

    const DELAY: Duration = Duration::from_millis(2000);

    #[tokio::test(start_paused = true)]
    async fn reconnects_forever_with_fixed_delay() {
        let connector = Arc::new(MemoryConnector::refusing());
        let manager = ConnectionManager::new("ws://board/ws", DELAY, connector.clone());
        let recorder = Arc::new(Recorder::default());
        assert!(manager.start(recorder.clone()));

        tokio::time::sleep(Duration::from_millis(6500)).await;

        let attempts = connector.attempt_times();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], DELAY);
        }
        assert_eq!(recorder.entries(), vec!["close"; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let connector = Arc::new(MemoryConnector::refusing());
        let manager = ConnectionManager::new("ws://board/ws", DELAY, connector.clone());
        let recorder = Arc::new(Recorder::default());
        assert!(manager.start(recorder.clone()));
        assert!(!manager.start(recorder.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempt_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_in_order_and_drops_when_closed() {
        let (connector, mut device) = MemoryConnector::with_session();
        let manager = ConnectionManager::new("ws://board/ws", DELAY, Arc::new(connector));
        let connection = manager.connection();
        let recorder = Arc::new(Recorder::default());

        assert_eq!(connection.send(&Command::ToggleButton(ButtonId::Btn1)), SendOutcome::Dropped);

        manager.start(recorder.clone());
        let mut state = connection.subscribe();
        state.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
        assert!(connection.is_open());

        assert_eq!(connection.send(&Command::ToggleButton(ButtonId::Btn1)), SendOutcome::Sent);
        assert_eq!(device.received.recv().await.as_deref(), Some("btn1"));

        device.reply.send("first".into()).unwrap();
        device.reply.send("second".into()).unwrap();
        drop(device.reply);

        state.wait_for(|s| *s == ConnectionState::Closed).await.unwrap();
        assert_eq!(recorder.entries(), vec!["open", "msg:first", "msg:second", "close"]);
        assert!(!connection.is_open());
        assert_eq!(connection.send(&Command::RequestSnapshot), SendOutcome::Dropped);
        assert_eq!(connection.dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn one_attempt_per_close_after_a_live_session() {
        let (connector, device) = MemoryConnector::with_session();
        let connector = Arc::new(connector);
        let manager = ConnectionManager::new("ws://board/ws", DELAY, connector.clone());
        let recorder = Arc::new(Recorder::default());
        manager.start(recorder.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(device);
        let closed_at = tokio::time::Instant::now();

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(connector.attempt_times().len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let attempts = connector.attempt_times();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1] - closed_at, DELAY);
    }

    #[tokio::test]
    async fn ws_connect_gives_up_after_timeout() {
        // accepts tcp but never answers the websocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let connector = WsConnector::new(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = connector.connect(&url).await;
        let elapsed = started.elapsed();

        let Err(err) = result else { panic!("handshake should not complete") };
        assert!(format!("{:#}", err).contains("timed out"), "{:#}", err);
        assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
        drop(listener);
    }
}
