//! Driver Error Types
//!
//! User-facing errors. [`DriverError`] is `Clone` so that a single transport
//! failure can be delivered to every request pending on a connection.

use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::bolt::{BoltError, FailureMessage, HandshakeError};

// ============================================================================
// DriverError
// ============================================================================

/// Driver error
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// No agreeable protocol version, or the handshake itself failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server sent something the protocol does not allow here
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// FAILURE reported by the server
    #[error("Server error: {code} - {message}")]
    Server { code: String, message: String },

    /// The connection is gone; every pending request receives this
    #[error("Connection terminated: {0}")]
    ConnectionTerminated(String),

    /// The server ignored the request because an earlier one failed
    #[error("Message ignored because of a previous failure")]
    MessageIgnored,

    /// A narrowing conversion would lose information
    #[error("Cannot coerce {from} to {to} without losing information")]
    LossyCoercion { from: String, to: String },

    /// Value of the wrong kind
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// Unknown record key or index
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// Token exchange or refresh failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl DriverError {
    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub fn connection_terminated(msg: impl Into<String>) -> Self {
        Self::ConnectionTerminated(msg.into())
    }

    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    pub fn lossy(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::LossyCoercion {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Status code of a server failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// `Neo.TransientError.*`
    pub fn is_transient(&self) -> bool {
        self.code().is_some_and(|c| c.starts_with("Neo.TransientError."))
    }

    /// `Neo.ClientError.*`
    pub fn is_client_error(&self) -> bool {
        self.code().is_some_and(|c| c.starts_with("Neo.ClientError."))
    }

    /// `Neo.DatabaseError.*`
    pub fn is_database_error(&self) -> bool {
        self.code().is_some_and(|c| c.starts_with("Neo.DatabaseError."))
    }

    /// Whether the connection cannot be used after this error.
    ///
    /// Security failures, invalid requests and database errors leave the
    /// server side of the connection unusable; everything else on the local
    /// side that is not a server failure means the transport is gone.
    pub fn is_fatal_for_connection(&self) -> bool {
        match self {
            Self::Server { code, .. } => {
                code.starts_with("Neo.ClientError.Security.")
                    || code == "Neo.ClientError.Request.Invalid"
                    || code.starts_with("Neo.DatabaseError.")
            }
            Self::ProtocolViolation(_)
            | Self::ConnectionTerminated(_)
            | Self::Handshake(_)
            | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Whether retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionTerminated(_) | Self::Io(_) => true,
            Self::Server { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }
}

/// Transient errors, except those caused by the client's own decisions.
fn is_retryable_code(code: &str) -> bool {
    code.starts_with("Neo.TransientError.")
        && code != "Neo.TransientError.Transaction.Terminated"
        && code != "Neo.TransientError.Transaction.LockClientStopped"
}

// ============================================================================
// Result Type
// ============================================================================

/// Driver result type
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Conversions
// ============================================================================

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        DriverError::Io(Arc::new(err))
    }
}

impl From<FailureMessage> for DriverError {
    fn from(failure: FailureMessage) -> Self {
        DriverError::Server {
            code: failure.code,
            message: failure.message,
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => DriverError::ConnectionTerminated(format!(
                "Connection to the database failed: {}",
                e
            )),
            BoltError::ConnectionClosed => {
                DriverError::ConnectionTerminated("Connection to the database terminated".to_string())
            }
            BoltError::Timeout => DriverError::ConnectionTerminated(
                "Connection read timed out due to it taking longer than the server-supplied timeout value"
                    .to_string(),
            ),
            BoltError::Handshake(HandshakeError::ConnectionClosed) => DriverError::ConnectionTerminated(
                "Connection to the database terminated during handshake".to_string(),
            ),
            BoltError::Handshake(e) => DriverError::Handshake(e.to_string()),
            BoltError::UnsupportedVersion(v) => DriverError::Handshake(format!(
                "Protocol error, server suggested unexpected protocol version: {}",
                crate::bolt::handshake::describe_raw(v)
            )),
            BoltError::PackStream(e) => DriverError::ProtocolViolation(e.to_string()),
            BoltError::Protocol(msg) => DriverError::ProtocolViolation(msg),
            BoltError::MessageTooLarge { .. } => DriverError::ProtocolViolation(err.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::PackStreamError;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::server("Neo.ClientError.Statement.SyntaxError", "Invalid syntax");
        assert_eq!(
            err.to_string(),
            "Server error: Neo.ClientError.Statement.SyntaxError - Invalid syntax"
        );
        assert_eq!(
            DriverError::lossy("FLOAT 1.5", "INTEGER").to_string(),
            "Cannot coerce FLOAT 1.5 to INTEGER without losing information"
        );
    }

    #[test]
    fn test_server_classification() {
        let err = DriverError::server("Neo.TransientError.Transaction.DeadlockDetected", "deadlock");
        assert!(err.is_transient());
        assert!(err.is_retryable());
        assert!(!err.is_fatal_for_connection());

        let err = DriverError::server("Neo.TransientError.Transaction.Terminated", "killed");
        assert!(err.is_transient());
        assert!(!err.is_retryable());

        let err = DriverError::server("Neo.ClientError.Statement.SyntaxError", "bad");
        assert!(err.is_client_error());
        assert!(!err.is_fatal_for_connection());
    }

    #[test]
    fn test_fatal_codes() {
        for code in [
            "Neo.ClientError.Security.Unauthorized",
            "Neo.ClientError.Security.TokenExpired",
            "Neo.ClientError.Request.Invalid",
            "Neo.DatabaseError.General.UnknownError",
        ] {
            assert!(DriverError::server(code, "").is_fatal_for_connection(), "{}", code);
        }
        assert!(DriverError::connection_terminated("eof").is_fatal_for_connection());
        assert!(!DriverError::MessageIgnored.is_fatal_for_connection());
    }

    #[test]
    fn test_clone_shares_io_error() {
        let err: DriverError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        let copy = err.clone();
        assert!(matches!(copy, DriverError::Io(_)));
        assert!(copy.is_retryable());
    }

    #[test]
    fn test_from_bolt_error() {
        let io_err = BoltError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        match DriverError::from(io_err) {
            DriverError::ConnectionTerminated(msg) => {
                assert!(msg.contains("Connection to the database failed"))
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = DriverError::from(BoltError::PackStream(PackStreamError::UnexpectedEof));
        assert!(matches!(err, DriverError::ProtocolViolation(_)));

        let err = DriverError::from(BoltError::Handshake(HandshakeError::NoCompatibleVersion));
        assert!(matches!(err, DriverError::Handshake(_)));

        let err = DriverError::from(BoltError::UnsupportedVersion(0x0000_0004));
        assert!(err.to_string().contains("4.0"));
    }

    #[test]
    fn test_from_failure_message() {
        let err: DriverError = FailureMessage::new("Neo.ClientError.Statement.SyntaxError", "x").into();
        assert_eq!(err.code(), Some("Neo.ClientError.Statement.SyntaxError"));
    }
}
