use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use yticker::ClientConfig;

use super::logger::parse_level;

/// Config file looked up in the working directory when `--config-path` is not given.
const DEFAULT_CONFIG_FILE: &str = "yticker_stream.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Streams Yahoo Finance quotes as JSON lines", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "YTICKER_SYMBOLS", value_delimiter = ',', help = "Comma separated symbols to subscribe to.")]
    pub symbols: Option<Vec<String>>,

    #[clap(long, env = "YTICKER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "YTICKER_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "YTICKER_LOG_LEVEL", help = "Logging level (off, error, warn, info, debug, trace).")]
    pub log_level: Option<String>,

    #[clap(long, env = "YTICKER_URL", help = "Yahoo Finance streamer WebSocket URL.")]
    pub yahoo_ws_url: Option<String>,

    #[clap(long, env = "YTICKER_PROTO_PATH", help = "Path to the Protobuf schema file.")]
    pub proto_path: Option<PathBuf>,

    #[clap(long, env = "YTICKER_MESSAGE_TYPE", help = "Root message decoded from each frame.")]
    pub message_type: Option<String>,

    #[clap(long, env = "YTICKER_CONNECT_TIMEOUT_MS", help = "Handshake deadline in milliseconds.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "YTICKER_CONNECT_ATTEMPTS", help = "Handshake attempts before giving up.")]
    pub connect_attempts: Option<u32>,

    #[clap(long, env = "YTICKER_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds between handshake attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "YTICKER_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between handshake attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            symbols: other.symbols.or(self.symbols),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            yahoo_ws_url: other.yahoo_ws_url.or(self.yahoo_ws_url),
            proto_path: other.proto_path.or(self.proto_path),
            message_type: other.message_type.or(self.message_type),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            connect_attempts: other.connect_attempts.or(self.connect_attempts),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            yahoo_ws_url: Some(yticker::config::YAHOO_WS_URL.to_string()),
            connect_attempts: Some(1),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols
            .iter()
            .flatten()
            .map(|symbol| symbol.trim().to_string())
            .filter(|symbol| !symbol.is_empty())
            .collect()
    }

    /// Library settings derived from this configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::default().with_verbosity(parse_level(self.log_level()));
        if let Some(url) = &self.yahoo_ws_url {
            client = client.with_endpoint(url.clone());
        }
        if let Some(path) = &self.proto_path {
            client = client.with_schema_path(path.clone());
        }
        if let Some(message_type) = &self.message_type {
            client = client.with_message_type(message_type.clone());
        }
        if let Some(timeout_ms) = self.connect_timeout_ms {
            client = client.with_connect_timeout(Duration::from_millis(timeout_ms));
        }
        let base = Duration::from_millis(self.reconnect_base_delay_ms.unwrap_or(1000));
        let max = Duration::from_millis(self.reconnect_max_delay_ms.unwrap_or(60000));
        client.with_retry(self.connect_attempts.unwrap_or(1), base, max)
    }
}

/// Reads the JSON config file. Problems are logged and the file is skipped.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, then the config file, then environment/CLI values.
pub fn resolve_config(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    // clap already folded environment variables into the parsed arguments.
    current_config.merge(cli_args)
}

pub fn load_config() -> Config {
    resolve_config(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_overrides_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.conf");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"symbols": ["AAPL", "MSFT"], "logLevel": "debug", "connectAttempts": 3}}"#
        )
        .unwrap();

        let cli = Config::parse_from([
            "yticker_stream",
            "--config-path",
            path.to_str().unwrap(),
            "--log-level",
            "warn",
        ]);
        let config = resolve_config(cli);

        assert_eq!(config.symbols(), vec!["AAPL", "MSFT"]);
        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.connect_attempts, Some(3));
        assert_eq!(config.yahoo_ws_url.as_deref(), Some(yticker::config::YAHOO_WS_URL));
    }

    #[test]
    fn test_unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "not json").unwrap();

        let cli = Config {
            config_path: Some(path),
            ..Default::default()
        };
        let config = resolve_config(cli);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.reconnect_max_delay_ms, Some(60000));
        assert!(config.symbols().is_empty());
    }

    #[test]
    fn test_symbol_list_is_split_and_trimmed() {
        let cli = Config::parse_from(["yticker_stream", "--symbols", "AAPL, BTC-USD,,^GSPC"]);
        assert_eq!(cli.symbols(), vec!["AAPL", "BTC-USD", "^GSPC"]);
    }

    #[test]
    fn test_client_config_mapping() {
        let config = Config {
            log_level: Some("debug".to_string()),
            yahoo_ws_url: Some("wss://example.test/".to_string()),
            connect_timeout_ms: Some(2500),
            connect_attempts: Some(4),
            reconnect_base_delay_ms: Some(200),
            reconnect_max_delay_ms: Some(800),
            ..Default::default()
        };
        let client = config.to_client_config();

        assert_eq!(client.endpoint, "wss://example.test/");
        assert_eq!(client.verbosity, log::LevelFilter::Debug);
        assert_eq!(client.connect_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(client.connect_attempts, 4);
        assert_eq!(client.retry_base_delay, Duration::from_millis(200));
        assert_eq!(client.retry_max_delay, Duration::from_millis(800));
        assert_eq!(client.message_type, "yticker");
    }
}
