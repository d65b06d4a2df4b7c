//! In-process connector. Every successful `open` yields a [`MemoryPeer`] that
//! plays the server side of the link: it injects frames, observes what the
//! client sent, and can drop the link.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc as link;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::proto_handler::PricingData;
use crate::transport::{Connector, Frame, Socket};

#[derive(Default)]
struct MemoryState {
    failures: VecDeque<String>,
    peers: Vec<MemoryPeer>,
    attempts: usize,
}

#[derive(Default)]
pub struct MemoryConnector {
    state: Mutex<MemoryState>,
    handshake_delay: Option<Duration>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every handshake by `delay`.
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = Some(delay);
        self
    }

    /// Makes the next handshake fail with `reason`. Calls queue up.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.lock().failures.push_back(reason.into());
    }

    /// Handshakes attempted, failed ones included.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Links successfully opened.
    pub fn opened(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn peer(&self, index: usize) -> Option<MemoryPeer> {
        self.lock().peers.get(index).cloned()
    }

    pub fn last_peer(&self) -> Option<MemoryPeer> {
        self.lock().peers.last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Socket, TransportError> {
        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.attempts += 1;
        if let Some(reason) = state.failures.pop_front() {
            return Err(TransportError::ConnectFailed(reason));
        }

        let (inbound_tx, inbound_rx) = link::unbounded();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();

        let sink = futures_util::sink::unfold(sent_tx, |tx: mpsc::UnboundedSender<String>, payload: String| async move {
            tx.send(payload)
                .map_err(|_| TransportError::Send("peer dropped".to_string()))?;
            Ok::<_, TransportError>(tx)
        });

        state.peers.push(MemoryPeer {
            url: url.to_string(),
            inbound: inbound_tx,
            sent: Arc::new(tokio::sync::Mutex::new(sent_rx)),
        });

        Ok(Socket::new(sink, inbound_rx))
    }
}

/// Server side of one in-process link.
#[derive(Clone)]
pub struct MemoryPeer {
    url: String,
    inbound: link::UnboundedSender<Result<Frame, TransportError>>,
    sent: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl MemoryPeer {
    /// URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Delivers a text frame. Returns `false` if the client side is gone.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.inbound.unbounded_send(Ok(Frame::Text(text.into()))).is_ok()
    }

    /// Replays a typed quote as one base64 text frame, the way the streamer
    /// sends it.
    pub fn push_quote(&self, quote: &PricingData) -> bool {
        self.push_text(quote.to_frame_text())
    }

    pub fn push_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.inbound.unbounded_send(Ok(Frame::Binary(data.into()))).is_ok()
    }

    /// Fails the client's next read with `reason`.
    pub fn push_error(&self, reason: impl Into<String>) -> bool {
        self.inbound
            .unbounded_send(Err(TransportError::Receive(reason.into())))
            .is_ok()
    }

    /// Next frame the client sent; `None` once the client closed its side.
    pub async fn recv_sent(&self) -> Option<String> {
        self.sent.lock().await.recv().await
    }

    /// Frames the client has sent so far and not yet received here.
    pub async fn drain_sent(&self) -> Vec<String> {
        let mut receiver = self.sent.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Ends the link from the server side, after already queued frames.
    pub fn disconnect(&self) {
        self.inbound.close_channel();
    }

    /// True once the client dropped its end of the link.
    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_socket_pairs_with_peer() {
        let connector = MemoryConnector::new();
        let Socket { mut sink, mut stream } = connector.open("memory://feed").await.unwrap();
        let peer = connector.peer(0).unwrap();

        sink.send("ping".to_string()).await.unwrap();
        assert_eq!(peer.recv_sent().await.as_deref(), Some("ping"));

        assert!(peer.push_text("pong"));
        assert_eq!(stream.next().await, Some(Ok(Frame::Text("pong".into()))));

        peer.disconnect();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed_in_order() {
        let connector = MemoryConnector::new();
        connector.fail_next("first");
        connector.fail_next("second");

        assert!(matches!(connector.open("memory://a").await, Err(TransportError::ConnectFailed(r)) if r == "first"));
        assert!(matches!(connector.open("memory://a").await, Err(TransportError::ConnectFailed(r)) if r == "second"));
        assert!(connector.open("memory://a").await.is_ok());
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn test_dropping_socket_closes_peer() {
        let connector = MemoryConnector::new();
        let socket = connector.open("memory://a").await.unwrap();
        let peer = connector.last_peer().unwrap();
        assert!(!peer.is_closed());

        drop(socket);
        assert!(peer.is_closed());
        assert!(!peer.push_text("late"));
        assert!(peer.drain_sent().await.is_empty());
    }
}
