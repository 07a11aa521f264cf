//! Boardsync Transport Layer
//!
//! Two mutually exclusive ways to reach the server:
//! - [`socket`]: a WebSocket owned by this process (standalone mode)
//! - [`relay`]: a message relay provided by a host application (embedded mode)
//!
//! The transport layer only moves frames and reports lifecycle events. It
//! does not decode messages or keep connection state beyond what a single
//! socket task needs.

pub mod endpoint;
pub mod error;
pub mod relay;
pub mod socket;

pub use endpoint::socket_url;
pub use error::TransportError;
pub use relay::{CloseCallback, ConnectCallback, ErrorCallback, ReadyState, RelayClient};
pub use socket::{EventSink, SocketEvent, SocketHandle, SocketId};
