//! Error types for the relay.

use std::net::SocketAddr;

/// A rejected inbound request.
///
/// Each variant carries the exact message sent back to the client. Most
/// rejections end the connection; see [`ProtocolError::is_fatal`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Body is not a JSON object.
    #[error("Error parsing JSON")]
    InvalidJson(String),

    /// No `type` field.
    #[error("Error: JSON does not contain type")]
    MissingType,

    /// `type` is neither `register` nor `notification`.
    #[error("Error: JSON type is not 'register' or 'notification'")]
    UnknownType,

    /// `register` without a `userID`.
    #[error("Error: JSON does not contain userID")]
    MissingUserId,

    /// `register` whose `userID` is not a string.
    #[error("Error: userID is not a string")]
    InvalidUserId,

    /// `notification` from a connection that has not registered.
    #[error("Error: Client not registered")]
    NotRegistered,

    /// `notification` without a usable `data` object.
    #[error("Error: JSON is not of type Notification")]
    MissingData,
}

impl ProtocolError {
    /// Whether the connection is closed after the error response is sent.
    ///
    /// Only an unregistered sender is allowed to keep its connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NotRegistered)
    }

    /// Underlying parser detail, sent as the `error` field.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(detail) => Some(detail),
            _ => None,
        }
    }

    /// Short label used for metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownType => "unknown_type",
            Self::MissingUserId => "missing_user_id",
            Self::InvalidUserId => "invalid_user_id",
            Self::NotRegistered => "not_registered",
            Self::MissingData => "missing_data",
        }
    }
}

/// Errors raised while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    MetricsRecorder(#[from] metrics_exporter_prometheus::BuildError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_registered_keeps_connection() {
        let all = [
            ProtocolError::InvalidJson("eof".into()),
            ProtocolError::MissingType,
            ProtocolError::UnknownType,
            ProtocolError::MissingUserId,
            ProtocolError::InvalidUserId,
            ProtocolError::NotRegistered,
            ProtocolError::MissingData,
        ];
        let survivors: Vec<_> = all.iter().filter(|e| !e.is_fatal()).collect();
        assert_eq!(survivors, vec![&ProtocolError::NotRegistered]);
    }

    #[test]
    fn invalid_json_display_hides_detail() {
        let err = ProtocolError::InvalidJson("expected value at line 1 column 1".into());
        assert_eq!(err.to_string(), "Error parsing JSON");
        assert_eq!(err.detail(), Some("expected value at line 1 column 1"));
    }

    #[test]
    fn other_errors_have_no_detail() {
        assert_eq!(ProtocolError::MissingType.detail(), None);
        assert_eq!(ProtocolError::NotRegistered.detail(), None);
    }

    #[test]
    fn unknown_type_message() {
        assert_eq!(
            ProtocolError::UnknownType.to_string(),
            "Error: JSON type is not 'register' or 'notification'"
        );
    }

    #[test]
    fn codes_are_snake_case() {
        for err in [
            ProtocolError::InvalidJson(String::new()),
            ProtocolError::MissingUserId,
            ProtocolError::MissingData,
        ] {
            assert!(err.code().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn bind_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:80"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = ServerError::from(io_err);
        assert!(err.to_string().contains("in use"));
    }
}
