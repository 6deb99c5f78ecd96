//! Bus-level error types.

use thiserror::Error;

/// The four channel registries a tag can be linked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Client → server notifications.
    ClientPush,
    /// Server → client notifications.
    ServerPush,
    /// Client-initiated request/response.
    ClientRequest,
    /// Server-initiated broadcast request/response.
    ServerRequest,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientPush => write!(f, "client-push"),
            Self::ServerPush => write!(f, "server-push"),
            Self::ClientRequest => write!(f, "client-request"),
            Self::ServerRequest => write!(f, "server-request"),
        }
    }
}

/// Coarse classification of a [`BusError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionClosed,
    RequestTimeout,
    DuplicateTag,
    WebSocket,
    Serialization,
}

/// Errors that can occur on the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The socket was not open at send time, or closed while the call was
    /// outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived within the configured window.
    #[error("request timed out after {ms}ms")]
    RequestTimeout { ms: u64 },

    /// A tag was linked twice on the same channel. This is a catalog mismatch
    /// and should abort initialisation.
    #[error("tag `{tag}` is already linked on the {channel} channel")]
    DuplicateTag { channel: ChannelKind, tag: String },

    /// WebSocket dial/send/receive error inside the transport.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A payload could not be encoded, or a response did not match the
    /// expected type.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Self::DuplicateTag { .. } => ErrorKind::DuplicateTag,
            Self::WebSocket(_) => ErrorKind::WebSocket,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Returns `true` if the peer was definitely unreachable.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Returns `true` if the call timed out (the peer may still be processing).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(BusError::ConnectionClosed.kind(), ErrorKind::ConnectionClosed);
        assert_eq!(
            BusError::RequestTimeout { ms: 50 }.kind(),
            ErrorKind::RequestTimeout
        );
        assert!(BusError::ConnectionClosed.is_connection_closed());
        assert!(!BusError::ConnectionClosed.is_timeout());
    }

    #[test]
    fn duplicate_tag_message_names_channel() {
        let err = BusError::DuplicateTag {
            channel: ChannelKind::ClientPush,
            tag: "ping".into(),
        };
        assert_eq!(
            err.to_string(),
            "tag `ping` is already linked on the client-push channel"
        );
    }
}
