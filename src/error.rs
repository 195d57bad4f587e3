//! Error types
//!
//! Structural errors (bad connections, malformed configuration) are returned to
//! the caller. Transport failures are reported by endpoints as [`TransportError`]
//! and are always handled inside the sending port.

/// Reason a connection could not be made or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// No endpoint was supplied
    NullReference,
    /// No connection with the given ID exists
    NotFound,
    /// The endpoint does not implement this port's interface
    WrongType,
    /// The endpoint could not be contacted to verify its interface
    Unreachable,
}

impl ConnectionErrorKind {
    /// Numeric code reported to callers
    pub fn code(&self) -> u16 {
        match self {
            ConnectionErrorKind::NullReference => 1,
            ConnectionErrorKind::NotFound => 2,
            ConnectionErrorKind::WrongType => 3,
            ConnectionErrorKind::Unreachable => 4,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionErrorKind::Unreachable)
    }
}

/// Error type for port operations
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Connect/disconnect referenced a bad or absent connection
    InvalidConnection {
        kind: ConnectionErrorKind,
        connection_id: String,
        message: String,
    },
    /// Malformed filter or configuration input
    IllegalArgument(String),
    /// No accumulator exists for the stream
    UnknownStream(String),
}

impl Error {
    pub(crate) fn invalid_connection(
        kind: ConnectionErrorKind,
        connection_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Error::InvalidConnection {
            kind,
            connection_id: connection_id.to_owned(),
            message: message.into(),
        }
    }

    /// Connection error kind, if this is a connection error
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Error::InvalidConnection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConnection {
                kind,
                connection_id,
                message,
            } => write!(
                f,
                "Invalid connection {} (code {}): {}",
                connection_id,
                kind.code(),
                message
            ),
            Error::IllegalArgument(msg) => write!(f, "Illegal argument: {}", msg),
            Error::UnknownStream(id) => write!(f, "Unknown stream: {}", id),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias for port operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an endpoint while delivering bursts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The message exceeded the transport's size limit
    MessageTooLarge,
    /// The remote side could not be contacted
    Unreachable(String),
    /// Any other delivery failure
    Failed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::MessageTooLarge => write!(f, "Message too large"),
            TransportError::Unreachable(msg) => write!(f, "Endpoint unreachable: {}", msg),
            TransportError::Failed(msg) => write!(f, "Transport failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_codes_distinct() {
        let kinds = [
            ConnectionErrorKind::NullReference,
            ConnectionErrorKind::NotFound,
            ConnectionErrorKind::WrongType,
            ConnectionErrorKind::Unreachable,
        ];
        let mut codes: Vec<u16> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(ConnectionErrorKind::Unreachable.is_retryable());
        assert!(!ConnectionErrorKind::NotFound.is_retryable());
        assert!(!ConnectionErrorKind::WrongType.is_retryable());
        assert!(!ConnectionErrorKind::NullReference.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::invalid_connection(ConnectionErrorKind::NotFound, "conn_1", "No connection");
        assert_eq!(err.to_string(), "Invalid connection conn_1 (code 2): No connection");
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::NotFound));
        assert_eq!(Error::UnknownStream("s".into()).connection_kind(), None);
    }
}
