//! Transport errors. These are what error subscribers receive.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid server address '{0}'")]
    InvalidUrl(String),

    #[error("unsupported scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    Socket(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("transport already closed")]
    Closed,
}
