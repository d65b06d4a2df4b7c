//! Client configuration and its defaults.

use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;

/// The Yahoo Finance streamer endpoint (v1 frames: bare base64 text).
pub const YAHOO_WS_URL: &str = "wss://streamer.finance.yahoo.com/";

/// Root message looked up in the schema file.
pub const DEFAULT_MESSAGE_TYPE: &str = "yticker";

/// Schema shipped with this crate.
pub fn default_schema_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/proto/yticker.proto"))
}

/// Settings for a `TickerClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Streaming endpoint URL.
    pub endpoint: String,
    /// Location of the `.proto` schema.
    pub schema_path: PathBuf,
    /// Root message decoded from each frame.
    pub message_type: String,
    /// Diagnostic verbosity of the injected logger.
    pub verbosity: LevelFilter,
    /// Deadline for one handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Handshake attempts per `subscribe` before giving up. `1` means no retry.
    pub connect_attempts: u32,
    /// First pause between handshake attempts; doubled after each failure.
    pub retry_base_delay: Duration,
    /// Upper bound for the pause between handshake attempts.
    pub retry_max_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: YAHOO_WS_URL.to_string(),
            schema_path: default_schema_path(),
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            verbosity: LevelFilter::Off,
            connect_timeout: None,
            connect_attempts: 1,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(60000),
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = path.into();
        self
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn with_verbosity(mut self, verbosity: LevelFilter) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enables bounded retry of the handshake with exponential backoff.
    pub fn with_retry(mut self, attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.retry_base_delay = base_delay;
        self.retry_max_delay = max_delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_single_attempt_and_no_deadline() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, YAHOO_WS_URL);
        assert_eq!(config.connect_attempts, 1);
        assert!(config.connect_timeout.is_none());
        assert!(config.schema_path.ends_with("proto/yticker.proto"));
    }

    #[test]
    fn test_retry_attempts_never_drop_below_one() {
        let config = ClientConfig::default().with_retry(0, Duration::from_millis(5), Duration::from_millis(50));
        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.retry_max_delay, Duration::from_millis(50));
    }
}
