//! Socket endpoint derivation from a server base address.

use url::Url;

use crate::error::TransportError;

/// Build the WebSocket endpoint for a server base address.
///
/// The socket scheme follows the base scheme (`https` → `wss`, `http` → `ws`;
/// `ws`/`wss` are kept). The path has any trailing slash removed and `/ws`
/// appended. Query and fragment are dropped.
pub fn socket_url(base: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(base).map_err(|_| TransportError::InvalidUrl(base.to_string()))?;

    let scheme = match parsed.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl(base.to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path = parsed.path().trim_end_matches('/');

    let endpoint = format!("{scheme}://{authority}{path}/ws");
    Url::parse(&endpoint).map_err(|_| TransportError::InvalidUrl(endpoint))
}
