//! Client setup errors.
//!
//! Only configuration-time calls return these. Faults on a live connection
//! go to error subscribers or the log instead.

use boardsync_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no server address configured for standalone mode")]
    NoServerAddress,

    #[error("transport mode already chosen for this client")]
    AlreadyInitialized,

    #[error("invalid plugin version '{version}': {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
