//! Boardsync Live Client
//!
//! Keeps a live update channel to a boards server, either over a WebSocket
//! it owns (standalone mode) or through a host application's relay
//! (embedded mode). Inbound block and category updates are coalesced by
//! entity id and delivered to subscribers in batches once the stream goes
//! quiet. Lost connections are recovered automatically.
//!
//! The client is built once by the application and passed around as a
//! cheap, clonable [`LiveClient`] handle.

pub mod client;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod version;

pub use client::LiveClient;
pub use coalescer::PendingUpdates;
pub use config::ClientConfig;
pub use error::ClientError;
pub use registry::{
    AppVersionHandler, ChangeHandler, ConfigChangeHandler, ErrorHandler, ReconnectHandler,
    StateChangeHandler,
};
pub use state::LifecycleState;
pub use version::VersionChange;

pub use boardsync_protocol::{ChangeKind, Entity, InboundMessage, PluginStatuses, RemoteConfig};
pub use boardsync_transport::{ReadyState, RelayClient, TransportError};
