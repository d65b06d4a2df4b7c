//! # Subscription Manager
//!
//! [`TickerClient`] is the library's entry point. It owns at most one live
//! [`Connection`] and serializes everything that touches it behind an async
//! mutex, so concurrent `subscribe` calls share one connection. The mutex is
//! held for the whole handshake; the state of the newest connection is also
//! mirrored outside it so [`TickerClient::connection_state`] never waits.
//!
//! The client keeps no record of which symbols were subscribed: each call
//! forwards its symbols to the server as given, and `unsubscribe` drops them
//! all by closing the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::config::ClientConfig;
use crate::core::dispatcher::{Callback, Dispatcher, TickerStream};
use crate::core::registry::SchemaRegistry;
use crate::core::stats::{FrameStats, FrameStatsSnapshot};
use crate::decoder::Decoder;
use crate::error::{ClientError, TransportError};
use crate::logger::ClientLogger;
use crate::schema::Schema;
use crate::transport::{Connection, ConnectionState, Connector, Frame};

/// Outbound control message: `{"subscribe":["AAPL","MSFT"]}`.
#[derive(Serialize)]
struct SubscribeRequest<'a> {
    subscribe: &'a [String],
}

pub struct TickerClient {
    config: ClientConfig,
    registry: SchemaRegistry,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<FrameStats>,
    logger: ClientLogger,
    connection: Mutex<Option<Connection>>,
    current_state: std::sync::Mutex<Option<watch::Receiver<ConnectionState>>>,
    next_connection_id: AtomicU64,
}

impl TickerClient {
    /// Client talking to `config.endpoint` over a real WebSocket.
    #[cfg(feature = "wss")]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(crate::transport::WssConnector::new()))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let logger = ClientLogger::new(config.verbosity);
        Self {
            registry: SchemaRegistry::from_config(&config, logger.clone()),
            dispatcher: Arc::new(Dispatcher::new(logger.clone())),
            stats: Arc::new(FrameStats::new()),
            connection: Mutex::new(None),
            current_state: std::sync::Mutex::new(None),
            next_connection_id: AtomicU64::new(1),
            connector,
            logger,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribes to `symbols`, connecting first if no live connection exists.
    ///
    /// Symbols are sent as given, duplicates and empty lists included. A
    /// `callback` replaces the one registered by an earlier call. The returned
    /// stream is the same for every call on this client.
    pub async fn subscribe<I, S>(&self, symbols: I, callback: Option<Callback>) -> Result<TickerStream, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        let schema = self.registry.ensure_loaded().await?;
        let request = serde_json::to_string(&SubscribeRequest { subscribe: &symbols })?;

        let mut slot = self.connection.lock().await;
        let connection = match slot.take() {
            Some(connection) if connection.state() == ConnectionState::Connected => connection,
            stale => {
                if let Some(connection) = stale {
                    self.logger.debug(format_args!(
                        "Connection {} is {:?}. Opening a new one.",
                        connection.id(),
                        connection.state()
                    ));
                    connection.close().await;
                }
                self.open_connection(&schema).await?
            }
        };
        let sent = connection.send(request);
        *slot = Some(connection);
        drop(slot);
        sent?;

        if let Some(callback) = callback {
            self.dispatcher.replace_callback(callback);
        }
        self.logger.info(format_args!("Subscribed to {:?}", symbols));

        Ok(self.stream())
    }

    /// Closes the connection if one is live. No-op otherwise.
    ///
    /// A `subscribe` still in its handshake holds the connection until the
    /// handshake settles (bounded by `connect_timeout` when one is set), so
    /// this call waits for it and then closes the fresh connection.
    pub async fn unsubscribe(&self) {
        let slot = self.connection.lock().await;
        match slot.as_ref() {
            Some(connection) if connection.state() == ConnectionState::Connected => {
                self.logger.info(format_args!("Unsubscribing. Closing connection {}", connection.id()));
                connection.close().await;
            }
            _ => self.logger.debug(format_args!("Unsubscribe without a live connection ignored")),
        }
    }

    /// Switches this client's diagnostic output on or off.
    pub fn set_logging(&self, enabled: bool) {
        self.logger.set_enabled(enabled);
    }

    pub fn logger(&self) -> &ClientLogger {
        &self.logger
    }

    /// State of the newest connection; `Disconnected` before the first one.
    /// Does not wait for a pending handshake, which reads as `Connecting`.
    pub fn connection_state(&self) -> ConnectionState {
        self.current_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(ConnectionState::Disconnected, |state| *state.borrow())
    }

    pub fn stats(&self) -> FrameStatsSnapshot {
        self.stats.snapshot()
    }

    /// Removes the callback; records keep flowing to stream listeners.
    pub fn clear_callback(&self) -> Option<Callback> {
        self.dispatcher.clear_callback()
    }

    /// The client's shared record stream.
    pub fn stream(&self) -> TickerStream {
        TickerStream::new(Arc::clone(&self.dispatcher))
    }

    /// Connects, retrying up to `connect_attempts` times with capped
    /// exponential backoff.
    async fn open_connection(&self, schema: &Arc<Schema>) -> Result<Connection, TransportError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut backoff = self.config.retry_base_delay;
        let mut attempt = 1;

        loop {
            let connection = self.build_connection(schema);
            connection.connect(Arc::clone(&self.connector), self.config.endpoint.clone())?;

            match connection.established(self.config.connect_timeout).await {
                Ok(()) => return Ok(connection),
                Err(e) if attempt < attempts => {
                    self.logger.warn(format_args!(
                        "Failed to connect to {}: {}. Retrying in {:?} (attempt {}/{})",
                        self.config.endpoint, e, backoff, attempt, attempts
                    ));
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.retry_max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    self.logger.error(format_args!("Failed to connect to {}: {}", self.config.endpoint, e));
                    return Err(e);
                }
            }
        }
    }

    /// New connection with the decode/dispatch handler installed.
    fn build_connection(&self, schema: &Arc<Schema>) -> Connection {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(id, self.logger.clone());
        *self.current_state.lock().unwrap_or_else(PoisonError::into_inner) = Some(connection.watch_state());

        let decoder = Decoder::new(Arc::clone(schema));
        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        let logger = self.logger.clone();

        connection.on_message(move |frame| {
            stats.record_received();
            match frame {
                Frame::Text(text) => match decoder.decode_text(&text) {
                    Ok(record) => {
                        stats.record_dispatched();
                        if dispatcher.dispatch(record).callback_panicked {
                            stats.record_callback_panic();
                        }
                    }
                    Err(e) => {
                        stats.record_decode_error();
                        logger.warn(format_args!("Dropping undecodable frame: {}", e));
                    }
                },
                Frame::Binary(data) => {
                    stats.record_discarded();
                    logger.debug(format_args!("Ignoring binary frame of {} bytes", data.len()));
                }
            }
        });

        connection
    }
}
