//! # yticker
//!
//! Streaming client for the Yahoo Finance quote streamer. A [`TickerClient`]
//! keeps one WebSocket connection, subscribes to symbols, decodes every
//! base64 protobuf frame against `proto/yticker.proto` and hands the resulting
//! [`TickerRecord`]s to stream listeners and an optional callback.
//!
//! ```no_run
//! use yticker::{ClientConfig, TickerClient};
//!
//! # async fn run() -> Result<(), yticker::ClientError> {
//! let client = TickerClient::new(ClientConfig::default());
//! let mut quotes = client.subscribe(["AAPL", "BTC-USD"], None).await?.listen();
//! while let Some(record) = quotes.recv().await {
//!     println!("{}", record.to_json());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod decoder;
pub mod error;
pub mod logger;
pub mod proto_handler;
pub mod record;
pub mod schema;
pub mod transport;

pub use config::ClientConfig;
pub use crate::core::{
    Callback, ConsumerRegistration, DispatchReport, FrameStatsSnapshot, TickerClient, TickerListener, TickerStream,
};
pub use decoder::Decoder;
pub use error::{ClientError, DecodeError, SchemaError, TransportError};
pub use logger::ClientLogger;
pub use record::{FieldValue, TickerRecord};
pub use schema::Schema;
pub use transport::{ConnectionState, MemoryConnector};
