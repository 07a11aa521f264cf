//! Client configuration.

use std::time::Duration;

/// Live client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base address used in standalone mode (e.g. `https://host/boards`)
    pub server_url: Option<String>,
    /// Delay before reopening a socket the server closed
    pub reconnect_delay: Duration,
    /// How often the relay's ready state is checked after it reports a close
    pub poll_interval: Duration,
    /// Quiet window before buffered updates are flushed
    pub notification_delay: Duration,
    /// Delay before resubscribing after a newer-or-equal plugin version is seen
    pub version_reconnect_delay: Duration,
    /// Upper bound on how long continuous updates may postpone a flush.
    /// `None` means a flush only happens after a full quiet window.
    pub max_notification_deferral: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            reconnect_delay: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(500),
            notification_delay: Duration::from_millis(100),
            version_reconnect_delay: Duration::from_millis(1000),
            max_notification_deferral: None,
        }
    }
}

impl ClientConfig {
    pub fn with_server_url(url: impl Into<String>) -> Self {
        Self {
            server_url: Some(url.into()),
            ..Self::default()
        }
    }
}
