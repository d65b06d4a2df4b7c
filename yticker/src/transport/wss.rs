//! WebSocket connector over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::error::TransportError;
use crate::transport::{Connector, Frame, Socket};

/// The streamer rejects handshakes without a browser-like agent.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct WssConnector {
    user_agent: String,
}

impl WssConnector {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl Default for WssConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WssConnector {
    async fn open(&self, url: &str) -> Result<Socket, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| TransportError::ConnectFailed(format!("invalid user agent: {}", e)))?;
        request.headers_mut().insert("User-Agent", agent);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();

        // .into() converts String to Utf8Bytes for newer tungstenite versions
        let sink = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(WsMessage::Text(text.into()))));

        // Ping/pong is answered by tungstenite; close frames end the stream.
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
            })
        });

        Ok(Socket::new(sink, stream))
    }
}
