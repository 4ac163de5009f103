//! Connection state types shared between transports and readers.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Connection state of a single transport (one physical link).
///
/// Transports are owned by an enumeration layer outside this workspace; the
/// session manager only observes these states and requests connects and
/// disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransportState {
    /// The link has been enumerated and can be connected.
    #[default]
    Available,
    /// A connection is being established.
    Connecting,
    /// The link is up.
    Connected,
    /// The link is being closed on request.
    Disconnecting,
    /// The link was closed on request.
    Disconnected,
    /// The link is temporarily interrupted and may recover.
    Interrupted,
    /// The link went away without being asked to.
    Lost,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Interrupted => "interrupted",
            Self::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Connection state of a logical reader, or of the active reader selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReaderState {
    /// Being connected (or, for the active selection, being bound).
    Connecting,
    /// Ready to use.
    Connected,
    /// Going away; release configuration now.
    Disconnecting,
    /// Gone.
    #[default]
    Disconnected,
    /// Temporarily unreachable.
    Interrupted,
    /// Gone without being asked to.
    Lost,
}

impl ReaderState {
    /// Map a transport state onto the reader state it announces.
    ///
    /// `Available` has no reader counterpart because an available transport
    /// has never been bound to a reader.
    ///
    /// # Examples
    ///
    /// ```
    /// use readerlink_types::{ReaderState, TransportState};
    ///
    /// assert_eq!(ReaderState::from_transport(TransportState::Lost), Some(ReaderState::Lost));
    /// assert_eq!(ReaderState::from_transport(TransportState::Available), None);
    /// ```
    #[must_use]
    pub fn from_transport(state: TransportState) -> Option<Self> {
        match state {
            TransportState::Available => None,
            TransportState::Connecting => Some(Self::Connecting),
            TransportState::Connected => Some(Self::Connected),
            TransportState::Disconnecting => Some(Self::Disconnecting),
            TransportState::Disconnected => Some(Self::Disconnected),
            TransportState::Interrupted => Some(Self::Interrupted),
            TransportState::Lost => Some(Self::Lost),
        }
    }

    /// Whether a reader in this state can no longer be commanded.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Disconnecting | Self::Disconnected | Self::Lost)
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Interrupted => "interrupted",
            Self::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Physical medium of a transport.
///
/// The declaration order is the preference order used when a reader has
/// more than one connected transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum TransportKind {
    /// USB cable.
    Usb,
    /// Serial port.
    Serial,
    /// TCP/IP network link.
    Network,
    /// Bluetooth (classic or LE).
    Bluetooth,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "USB"),
            Self::Serial => write!(f, "Serial"),
            Self::Network => write!(f, "Network"),
            Self::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}
