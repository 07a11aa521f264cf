//! Protocol-level errors raised while decoding inbound frames.

use thiserror::Error;

/// A frame that could not be turned into something the client acts on.
///
/// None of these are surfaced to subscribers; the client logs and drops the
/// frame while the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON, or did not match the message shape.
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),

    /// The server reported an error in place of a payload.
    #[error("server error: {0}")]
    Remote(String),

    /// The action tag requires a payload field that was absent.
    #[error("{0} message without payload")]
    MissingPayload(&'static str),
}
