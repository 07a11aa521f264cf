//! Host relay interface for embedded mode.
//!
//! When boardsync runs inside a host application, the host already owns a
//! connection to the server and exposes it through a relay client. Boardsync
//! registers its lifecycle callbacks on the relay and sends namespaced
//! actions through it. The relay's connection is never opened or closed by
//! boardsync.

use std::fmt;

use serde_json::Value;

use crate::error::TransportError;

/// Called on first connect and on relay-reported reconnects.
pub type ConnectCallback = Box<dyn Fn() + Send + Sync>;
/// Called with the relay's transport error.
pub type ErrorCallback = Box<dyn Fn(TransportError) + Send + Sync>;
/// Called when the relay loses its connection, with the consecutive
/// connect-failure count.
pub type CloseCallback = Box<dyn Fn(u32) + Send + Sync>;

/// Numeric readiness of the relay's underlying connection.
///
/// Values follow the WebSocket `readyState` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadyState(pub u16);

impl ReadyState {
    pub const CONNECTING: ReadyState = ReadyState(0);
    pub const OPEN: ReadyState = ReadyState(1);
    pub const CLOSING: ReadyState = ReadyState(2);
    pub const CLOSED: ReadyState = ReadyState(3);

    pub fn is_open(&self) -> bool {
        *self == Self::OPEN
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::CONNECTING => f.write_str("connecting"),
            Self::OPEN => f.write_str("open"),
            Self::CLOSING => f.write_str("closing"),
            Self::CLOSED => f.write_str("closed"),
            ReadyState(other) => write!(f, "unknown({other})"),
        }
    }
}

/// Capability object supplied by the host application.
///
/// Callbacks may be invoked from any thread. Setting a callback replaces the
/// previous one.
pub trait RelayClient: Send + Sync {
    /// Send an already-prefixed action with its payload. No response is
    /// expected.
    fn send_message(&self, action: &str, payload: Value);

    fn set_first_connect_callback(&self, callback: ConnectCallback);

    fn set_reconnect_callback(&self, callback: ConnectCallback);

    fn set_error_callback(&self, callback: ErrorCallback);

    fn set_close_callback(&self, callback: CloseCallback);

    /// Current readiness of the relay's connection. Only read by the
    /// reconnect poll.
    fn ready_state(&self) -> ReadyState;
}
