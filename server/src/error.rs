use thiserror::Error;

use crate::hub::ConnectionId;

/// Why an inbound frame was discarded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or a known message kind without its required fields.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Direct chat without `from.userId`; the sender echo cannot be resolved.
    #[error("direct chat is missing `from.userId`")]
    MissingSender,
}

/// Errors surfaced by the hub to the transport layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("hub is not running")]
    HubUnavailable,
}
