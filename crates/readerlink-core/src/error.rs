//! Error types for readerlink-core.
//!
//! Errors fall into a small number of categories that callers handle
//! differently:
//!
//! | Error | Category | Typical handling |
//! |-------|----------|------------------|
//! | [`Error::InvalidIdentifier`] | Validation | Report to the user, no device was touched |
//! | [`Error::Device`] | Device communication | Caught at phase boundaries, narrated, operation fails |
//! | [`Error::NoActiveReader`] | Session | Wait for a reader to connect |
//! | [`Error::UnsupportedOperation`] | Session | Reader lacks the capability |
//! | [`Error::IdentityUnresolved`] | Identification | Transport dropped per policy |
//! | [`Error::ChannelClosed`] | Internal | Session worker has stopped |
//!
//! Semantic outcomes of the tag access orchestrator (no tag, several tags,
//! tag too far, incomplete write) are not errors; they are reported as
//! [`crate::epc_changer::EpcChangeOutcome`] values.

use thiserror::Error;

use readerlink_types::ParseError;

/// Errors that can occur while managing readers and running operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A new identifier failed validation.
    #[error("Please enter a valid EPC: {0}")]
    InvalidIdentifier(String),

    /// A device round trip failed.
    #[error("{operation} failed: {message}")]
    Device {
        /// The round trip that failed (e.g. `enable`, `identify`).
        operation: String,
        /// The reason reported by the transport or command layer.
        message: String,
    },

    /// No reader is currently active.
    #[error("Not currently connected to a reader")]
    NoActiveReader,

    /// The active reader does not provide the required capability.
    #[error("Reader does not support {0} operations")]
    UnsupportedOperation(&'static str),

    /// The reader is not known to the session.
    #[error("Unknown reader: {0}")]
    UnknownReader(String),

    /// The transport or reader is not connected.
    #[error("Not connected")]
    NotConnected,

    /// A reader could not be identified over a transport.
    #[error("Unable to identify reader over transport {transport_id}")]
    IdentityUnresolved {
        /// Transport that was queried.
        transport_id: String,
    },

    /// Pairing a hardware address failed.
    #[error("Pairing failed for {address}: {reason}")]
    Pairing {
        /// Hardware address.
        address: String,
        /// Reason reported by the transports manager.
        reason: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session worker is no longer running.
    #[error("Session channel closed")]
    ChannelClosed,

    /// Failed to parse a tag value.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Error {
    /// Create a device communication error.
    pub fn device(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an identifier validation error.
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a pairing error.
    pub fn pairing(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pairing {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from a device round trip.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device { .. } | Self::NotConnected)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}

/// Result type alias using readerlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
