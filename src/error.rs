//! Error types for instrument communication.
//!
//! `InstrumentError` is the single error type returned by every transport and
//! driver in the crate. It is built with `thiserror` so lower-level errors
//! (`std::io::Error`, `serialport::Error`) convert into
//! it through `?`.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `Io`, `Serial`, `Timeout`, `UnexpectedEof`, `NotConnected`.
//! - **Build/feature**: `FeatureNotEnabled`, `UnsupportedCommunicationMethod`.
//! - **Caller mistakes**: `InvalidArgument`, raised before anything reaches
//!   the wire.
//! - **Instrument replies**: `InvalidResponse`, `UnexpectedResponse`,
//!   `MalformedResponse` and `Ts3Nack` for replies that could not be
//!   interpreted or that the instrument explicitly rejected.

use std::time::Duration;

use thiserror::Error;

use crate::common::ConnectionMethod;
use crate::platform::next::ts3::NackReason;

/// Convenience alias for results using the crate error type.
pub type InstrumentResult<T> = std::result::Result<T, InstrumentError>;

/// Every failure a transport or driver can report.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// Socket or port I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No (complete) reply arrived in time.
    #[error("Timed out after {0:?} waiting for the instrument")]
    Timeout(Duration),

    /// The peer closed the connection.
    #[error("Unexpected EOF from instrument connection")]
    UnexpectedEof,

    /// The transport was used before it was opened.
    #[error("Instrument connection is not open")]
    NotConnected,

    /// The crate was built without the cargo feature this path needs.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// A configured transport without an implementation (VISA).
    #[error("Communication method {0} is not supported")]
    UnsupportedCommunicationMethod(ConnectionMethod),

    /// Rejected before anything was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A reply that does not parse as the value the command returns.
    #[error("Could not interpret response {response:?} to command {command:?}")]
    InvalidResponse {
        /// Command that was sent, without terminator.
        command: String,
        /// Raw reply text.
        response: String,
    },

    /// A TS3 reply carrying a different reply code than the command expects.
    #[error("Expected response code {expected}, got {got}")]
    UnexpectedResponse {
        /// Reply code the command answers with.
        expected: String,
        /// Reply code that arrived.
        got: String,
    },

    /// A reply with missing or unparsable fields.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The TS3 answered with a NACK.
    #[error("TS3 rejected the command: {0}")]
    Ts3Nack(NackReason),
}

impl InstrumentError {
    pub(crate) fn invalid_response(command: &str, response: &str) -> Self {
        Self::InvalidResponse {
            command: command.trim().to_string(),
            response: response.to_string(),
        }
    }
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for InstrumentError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(kind) => {
                Self::Io(std::io::Error::new(kind, err.description))
            }
            _ => Self::Serial(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InstrumentError::InvalidArgument("channel 4 does not exist".to_string());
        assert_eq!(err.to_string(), "Invalid argument: channel 4 does not exist");
    }

    #[test]
    fn test_unsupported_method_display() {
        let err = InstrumentError::UnsupportedCommunicationMethod(ConnectionMethod::Visa);
        assert_eq!(err.to_string(), "Communication method VISA is not supported");
    }

    #[test]
    fn test_nack_display() {
        let err = InstrumentError::Ts3Nack(NackReason::Busy);
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn test_invalid_response_trims_command() {
        let err = InstrumentError::invalid_response("V1O?\n", "garbage");
        assert!(matches!(
            err,
            InstrumentError::InvalidResponse { ref command, .. } if command == "V1O?"
        ));
    }
}
