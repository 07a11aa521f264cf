//! Connection state and the active transport.

use std::fmt;
use std::sync::Arc;

use boardsync_transport::{RelayClient, SocketHandle};
use semver::Version;
use tokio::task::JoinHandle;

use crate::coalescer::Coalescer;

/// Connection lifecycle as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, no connect reported yet
    Init,
    /// Transport reported a successful connect
    Open,
    /// Transport reported a disconnect
    Close,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport a client drives. Chosen once; never switches variant.
pub(crate) enum Transport {
    /// Own WebSocket. `None` once `close()` detached it.
    Standalone(Option<SocketHandle>),
    /// Host relay. Stays attached for the client's life.
    Embedded(EmbeddedRelay),
}

pub(crate) struct EmbeddedRelay {
    pub relay: Arc<dyn RelayClient>,
    pub plugin_id: String,
    pub version: Version,
    pub action_prefix: String,
}

impl EmbeddedRelay {
    pub fn new(plugin_id: &str, version: Version, relay: Arc<dyn RelayClient>) -> Self {
        Self {
            relay,
            plugin_id: plugin_id.to_string(),
            version,
            action_prefix: format!("custom_{plugin_id}_"),
        }
    }

    pub fn prefixed(&self, action: &str) -> String {
        format!("{}{action}", self.action_prefix)
    }
}

/// Mutable client state, guarded by one lock.
pub(crate) struct ClientState {
    pub lifecycle: LifecycleState,
    pub transport: Option<Transport>,
    pub coalescer: Coalescer,
    /// Standalone reopen, or embedded resubscribe after a version change
    pub reconnect_timer: Option<JoinHandle<()>>,
    /// Embedded ready-state poll
    pub poll_task: Option<JoinHandle<()>>,
    /// Set by `close()`, cleared by `open()`. No reconnect work is scheduled
    /// while set.
    pub closed: bool,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Init,
            transport: None,
            coalescer: Coalescer::default(),
            reconnect_timer: None,
            poll_task: None,
            closed: false,
        }
    }

    pub fn has_transport(&self) -> bool {
        matches!(
            self.transport,
            Some(Transport::Standalone(Some(_))) | Some(Transport::Embedded(_))
        )
    }

    pub fn embedded(&self) -> Option<&EmbeddedRelay> {
        match &self.transport {
            Some(Transport::Embedded(relay)) => Some(relay),
            _ => None,
        }
    }

    pub fn active_socket_id(&self) -> Option<u64> {
        match &self.transport {
            Some(Transport::Standalone(Some(socket))) => Some(socket.id()),
            _ => None,
        }
    }

    /// Abort every scheduled timer and drop buffered updates.
    pub fn cancel_timers(&mut self) {
        self.coalescer.cancel();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(poll) = self.poll_task.take() {
            poll.abort();
        }
    }
}
