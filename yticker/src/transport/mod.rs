//! # Transport
//!
//! A [`Connection`] is one WebSocket session. It moves through
//! `Disconnected → Connecting → Connected → Closed` and never back: a closed
//! connection stays closed and reconnecting means building a new one.
//!
//! The socket itself comes from a [`Connector`], so the same session logic runs
//! over tokio-tungstenite ([`WssConnector`]) and over in-process channels
//! ([`MemoryConnector`]).
//!
//! Each connection owns one spawned session task. That task drives the
//! handshake, writes queued outbound frames and hands every inbound frame to
//! the registered message handler, in arrival order, one at a time. A handler
//! that panics loses only the frame it was given. However the task ends, the
//! state is left at `Closed`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::TransportError;
use crate::logger::{panic_message, ClientLogger};

pub mod memory;
#[cfg(feature = "wss")]
pub mod wss;

pub use memory::{MemoryConnector, MemoryPeer};
#[cfg(feature = "wss")]
pub use wss::WssConnector;

const EVENT_CAPACITY: usize = 16;

/// One inbound WebSocket data frame. Control frames never surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open socket: text frames go out through `sink`, data frames come in
/// through `stream`. The stream ending means the peer closed the link.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Socket {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Socket")
    }
}

/// Opens sockets. Performs exactly one handshake per call.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Socket, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    ConnectFailed(String),
    Closed,
}

/// Receives every inbound frame of a connection.
pub type MessageHandler = Box<dyn FnMut(Frame) + Send>;

enum Outbound {
    Text(String),
    Close,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Connection {
    id: u64,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<ConnectionEvent>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    failure: Arc<Mutex<Option<String>>>,
    unhandled: Arc<AtomicU64>,
    logger: ClientLogger,
}

impl Connection {
    pub fn new(id: u64, logger: ClientLogger) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            state: Arc::new(state),
            events,
            handler: Arc::new(Mutex::new(None)),
            outbound: Mutex::new(None),
            failure: Arc::new(Mutex::new(None)),
            unhandled: Arc::new(AtomicU64::new(0)),
            logger,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Live view of the state, readable without holding the connection.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Frames that arrived while no handler was registered.
    pub fn unhandled_frames(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// Registers the receive handler, replacing any earlier one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(Frame) + Send + 'static,
    {
        *lock(&self.handler) = Some(Box::new(handler));
    }

    /// Starts the handshake on a new session task. Returns immediately; use
    /// [`Connection::established`] or [`Connection::events`] for the outcome.
    pub fn connect(&self, connector: Arc<dyn Connector>, url: impl Into<String>) -> Result<(), TransportError> {
        let mut outbound = lock(&self.outbound);
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(TransportError::Reused);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *outbound = Some(tx);
        drop(outbound);

        let url = url.into();
        self.logger.debug(format_args!("Connection {} connecting to {}", self.id, url));
        let session = Session {
            id: self.id,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            handler: Arc::clone(&self.handler),
            failure: Arc::clone(&self.failure),
            unhandled: Arc::clone(&self.unhandled),
            logger: self.logger.clone(),
        };
        tokio::spawn(session.run(connector, url, rx));
        Ok(())
    }

    /// Waits until the handshake has either completed or failed.
    ///
    /// With a deadline, a handshake still pending when it expires is abandoned:
    /// the session is closed and `Timeout` is returned.
    pub async fn established(&self, deadline: Option<Duration>) -> Result<(), TransportError> {
        let mut state = self.state.subscribe();
        let outcome = {
            let settled = state.wait_for(|state| *state != ConnectionState::Connecting);
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, settled)
                    .await
                    .map(|result| result.map(|state| *state))
                {
                    Ok(result) => result,
                    Err(_) => {
                        self.logger.warn(format_args!(
                            "Connection {} handshake timed out after {:?}",
                            self.id, limit
                        ));
                        self.close().await;
                        return Err(TransportError::Timeout(limit));
                    }
                },
                None => settled.await.map(|state| *state),
            }
        };

        match outcome {
            Ok(ConnectionState::Connected) => Ok(()),
            Ok(ConnectionState::Disconnected) => Err(TransportError::NotConnected),
            _ => Err(match lock(&self.failure).clone() {
                Some(description) => TransportError::ConnectFailed(description),
                None => TransportError::Closed,
            }),
        }
    }

    /// Queues one text frame for the session task.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let outbound = lock(&self.outbound);
        let sender = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(Outbound::Text(payload.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Ends the session and waits until the state reads `Closed`. Idempotent.
    pub async fn close(&self) {
        {
            let mut outbound = lock(&self.outbound);
            match outbound.take() {
                Some(sender) => {
                    let _ = sender.send(Outbound::Close);
                }
                None => {
                    let closed = self.state.send_if_modified(|state| {
                        if *state == ConnectionState::Disconnected {
                            *state = ConnectionState::Closed;
                            true
                        } else {
                            false
                        }
                    });
                    if closed {
                        let _ = self.events.send(ConnectionEvent::Closed);
                    }
                }
            }
        }

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// State shared between a [`Connection`] and its session task.
struct Session {
    id: u64,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<ConnectionEvent>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
    failure: Arc<Mutex<Option<String>>>,
    unhandled: Arc<AtomicU64>,
    logger: ClientLogger,
}

impl Session {
    async fn run(
        self,
        connector: Arc<dyn Connector>,
        url: String,
        mut commands: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let opened = tokio::select! {
            result = connector.open(&url) => Some(result),
            _ = close_requested(&mut commands) => None,
        };

        let socket = match opened {
            Some(Ok(socket)) => socket,
            Some(Err(e)) => {
                let description = e.to_string();
                self.logger.error(format_args!("Connection {} failed: {}", self.id, description));
                *lock(&self.failure) = Some(description.clone());
                self.finish(Some(ConnectionEvent::ConnectFailed(description)));
                return;
            }
            None => {
                self.logger.debug(format_args!("Connection {} closed during handshake", self.id));
                self.finish(None);
                return;
            }
        };

        self.state.send_replace(ConnectionState::Connected);
        let _ = self.events.send(ConnectionEvent::Connected);
        self.logger.info(format_args!("Connection {} established to {}", self.id, url));

        let Socket { mut sink, mut stream } = socket;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Outbound::Text(payload)) => {
                        if let Err(e) = sink.send(payload).await {
                            self.logger.warn(format_args!("Connection {} write failed: {}", self.id, e));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.close().await;
                        self.logger.info(format_args!("Connection {} closed locally", self.id));
                        break;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.deliver(frame),
                    Some(Err(e)) => {
                        self.logger.warn(format_args!("Connection {} read failed: {}", self.id, e));
                        break;
                    }
                    None => {
                        self.logger.info(format_args!("Connection {} closed by peer", self.id));
                        break;
                    }
                },
            }
        }

        drop(sink);
        drop(stream);
        self.finish(None);
    }

    fn deliver(&self, frame: Frame) {
        match lock(&self.handler).as_mut() {
            Some(handler) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                    self.logger.error(format_args!(
                        "Connection {} message handler panicked: {}. Frame dropped.",
                        self.id,
                        panic_message(payload.as_ref())
                    ));
                }
            }
            None => {
                self.unhandled.fetch_add(1, Ordering::Relaxed);
                self.logger.debug(format_args!("Connection {} has no handler. Frame discarded.", self.id));
            }
        }
    }

    fn finish(&self, failure: Option<ConnectionEvent>) {
        self.state.send_replace(ConnectionState::Closed);
        if let Some(event) = failure {
            let _ = self.events.send(event);
        }
        let _ = self.events.send(ConnectionEvent::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Task torn down before reaching `finish` (runtime shutdown, abort).
        if *self.state.borrow() != ConnectionState::Closed {
            self.finish(None);
        }
    }
}

/// Resolves once `close` was requested or the owning connection was dropped.
async fn close_requested(commands: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Some(command) = commands.recv().await {
        if let Outbound::Close = command {
            return;
        }
    }
}
