//! Error types for pmsense-core.
//!
//! None of these errors escape the sampler's control surface. The connection
//! manager and sampling loop turn them into state transitions (try the next
//! port, back off, count a failed read) and log them. They are public so
//! that driver implementations and the probe API can report precise causes.
//!
//! | Error Type | Handled as |
//! |------------|------------|
//! | [`Error::PortOpen`] | Try the next candidate port |
//! | [`Error::UnsupportedSetting`] | Reopen the port without the setting |
//! | [`Error::DriverUnavailable`] | Reported once, connect keeps failing |
//! | [`Error::Driver`] / [`Error::Timeout`] / [`Error::Io`] | Transient read error |
//! | [`Error::Parse`] | No data for this tick |
//! | [`Error::InvalidConfig`] | Returned from sampler construction |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to a sensor over a serial link.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The serial port could not be opened.
    #[error("Failed to open {port}: {reason}")]
    PortOpen {
        /// Port identifier.
        port: String,
        /// Description of the failure.
        reason: String,
    },

    /// The transport does not support a requested link setting.
    #[error("Unsupported link setting: {0}")]
    UnsupportedSetting(String),

    /// No sensor driver backend is available at all.
    #[error("No compatible sensor driver available")]
    DriverUnavailable,

    /// Operation attempted on a closed link.
    #[error("Not connected to device")]
    NotConnected,

    /// The driver does not implement the operation.
    #[error("Operation '{0}' is not supported by this driver")]
    Unsupported(String),

    /// A driver operation failed.
    #[error("Driver error during {operation}: {message}")]
    Driver {
        /// The operation that failed.
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// A response could not be normalized.
    #[error(transparent)]
    Parse(#[from] pmsense_types::ParseError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Serial port enumeration or configuration error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a port open error.
    pub fn port_open(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Create a driver error with operation context.
    pub fn driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported(operation.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using pmsense-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
