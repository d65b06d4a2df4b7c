//! # Error Types
//!
//! One enum per concern. Setup failures (`SchemaError`, `TransportError`) reach
//! the caller of `TickerClient::subscribe` through `ClientError`; per-frame
//! failures (`DecodeError`) never leave the session task.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to load or interpret the protobuf schema definition.
///
/// Every variant is fatal to the `subscribe` call that triggered the load. The
/// registry stays empty afterwards, so retrying is safe.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The schema file could not be read.
    #[error("failed to read schema {path}: {source}")]
    Io {
        /// Location that was attempted.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The schema does not compile: a syntax error, an unresolved type, a
    /// duplicate field number or a failed import.
    #[error("schema compile error: {0}")]
    Compile(String),
    /// The requested root message is not declared in the schema.
    #[error("message type '{0}' not found in schema")]
    MissingMessage(String),
    /// A root message field the decoder cannot normalize (repeated, map or message-typed).
    #[error("unsupported schema construct: {0}")]
    Unsupported(String),
}

/// Connection level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The WebSocket handshake did not complete.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// A frame was sent before the connection was established.
    #[error("not connected")]
    NotConnected,
    /// The handshake did not complete within the caller's deadline.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// The session ended (locally or remotely).
    #[error("connection closed")]
    Closed,
    /// Writing a frame to the socket failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    Receive(String),
    /// `connect` was called on a connection that already left `Disconnected`.
    #[error("connection already used; create a new one to reconnect")]
    Reused,
}

/// Per-frame decoding failure. Logged and counted, never fatal to the session.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// A text frame looked like a JSON envelope but was not one.
    #[error("invalid frame envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    /// The frame payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Malformed wire data: bad key or varint, a wire type contradicting the
    /// declared field type, a truncated value or a string that is not UTF-8.
    #[error("malformed protobuf: {0}")]
    Wire(#[from] prost::DecodeError),
    /// The frame carries a tag the schema does not declare.
    #[error("unknown field tag {tag}")]
    UnknownField {
        /// Tag number found on the wire.
        tag: u32,
    },
    /// An enum field carries a number missing from the schema's table.
    #[error("field '{field}' has undeclared enum value {value}")]
    UnknownEnumValue {
        /// Schema field name.
        field: String,
        /// Raw number found on the wire.
        value: i32,
    },
    /// A decoded value has no flat record form.
    #[error("field '{field}' has no scalar representation")]
    Unsupported {
        /// Schema field name.
        field: String,
    },
}

/// Errors surfaced by `TickerClient` operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Loading the schema failed (the `SchemaLoadError` kind).
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Establishing the connection or sending the request failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The subscribe request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}
