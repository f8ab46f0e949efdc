//! Error types for the serial bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use webserial_bridge::{Dispatcher, Result};
//!
//! async fn example(dispatcher: &Dispatcher) -> Result<()> {
//!     let port = dispatcher.port("/dev/ttyUSB0", Default::default());
//!     port.connect(|bytes| println!("{bytes:?}")).await?;
//!     port.write(b"hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::HelperExited`] |
//! | Protocol | [`Error::Protocol`], [`Error::Desync`] |
//! | Request | [`Error::Remote`], [`Error::RequestTimeout`] |
//! | Port | [`Error::AlreadyOpen`], [`Error::OpenInProgress`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Base64`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use base64::DecodeError;
use thiserror::Error;

use crate::identifiers::PortId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge or native host configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Failed to reach the native helper.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The outbound channel is gone or the reply sender was dropped.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The native helper process disconnected.
    ///
    /// Every request still pending at that moment fails with this error.
    #[error("Native helper exited")]
    HelperExited,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed traffic on the channel.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error correlation data could not be parsed.
    ///
    /// Only surfaced to pending callers under [`DesyncPolicy::TearDown`].
    ///
    /// [`DesyncPolicy::TearDown`]: crate::DesyncPolicy::TearDown
    #[error("Transport desynchronized: {message}")]
    Desync {
        /// The raw correlation text that failed to parse.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The native helper rejected a request.
    #[error("Remote error: {message}")]
    Remote {
        /// Error description reported by the helper.
        message: String,
    },

    /// A request received no reply within the configured timeout.
    #[error("Request {kind} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The reply kind that was awaited.
        kind: &'static str,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Port Errors
    // ========================================================================
    /// `connect` was called on a handle that is already open.
    #[error("Port {device_path} is already open as {id}")]
    AlreadyOpen {
        /// Device path of the handle.
        device_path: String,
        /// Id the handle is open under.
        id: PortId,
    },

    /// `connect` was called while an earlier open is still in flight.
    #[error("Port {device_path} has an open request in flight")]
    OpenInProgress {
        /// Device path of the handle.
        device_path: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error from the native helper pipes.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid base64 payload.
    #[error("Base64 error: {0}")]
    Base64(#[from] DecodeError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a desync error.
    #[inline]
    pub fn desync(message: impl Into<String>) -> Self {
        Self::Desync {
            message: message.into(),
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(kind: &'static str, timeout_ms: u64) -> Self {
        Self::RequestTimeout { kind, timeout_ms }
    }

    /// Creates an already-open error.
    #[inline]
    pub fn already_open(device_path: impl Into<String>, id: PortId) -> Self {
        Self::AlreadyOpen {
            device_path: device_path.into(),
            id,
        }
    }

    /// Creates an open-in-progress error.
    #[inline]
    pub fn open_in_progress(device_path: impl Into<String>) -> Self {
        Self::OpenInProgress {
            device_path: device_path.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if the native helper reported this error.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::HelperExited | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry. Retrying is left to callers.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::Remote { .. } | Self::OpenInProgress { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::remote("Could not open serial port");
        assert_eq!(err.to_string(), "Remote error: Could not open serial port");
    }

    #[test]
    fn test_already_open_display() {
        let err = Error::already_open("/dev/ttyUSB0", PortId::new(3));
        assert_eq!(err.to_string(), "Port /dev/ttyUSB0 is already open as 3");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout("PortOpen", 5000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
        assert_eq!(
            timeout_err.to_string(),
            "Request PortOpen timed out after 5000ms"
        );
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::HelperExited.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::remote("busy").is_recoverable());
        assert!(!Error::desync("garbage").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
