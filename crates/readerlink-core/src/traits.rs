//! Trait abstractions for the collaborators the session talks to.
//!
//! Transports, the transports manager, reader identification and the
//! per-reader capability objects ("operations") are provided by an external
//! transport and command library. These traits are the seams between that
//! library and this crate; the [`crate::mock`] module implements all of them
//! for tests and simulations.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use readerlink_types::{TagAccess, TagFilter, TransponderBatch, TransponderData, TransportKind, TransportState};

use crate::barcode::BarcodeScan;
use crate::error::Result;
use crate::reader::Capabilities;

/// One physical communication link to a candidate reader.
///
/// # Example
///
/// ```ignore
/// use readerlink_core::{Transport, Result};
///
/// async fn reconnect<T: Transport + ?Sized>(transport: &T) -> Result<()> {
///     transport.disconnect().await?;
///     transport.connect().await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Stable identifier of the link.
    fn id(&self) -> &str;

    /// Short human-readable name.
    fn display_name(&self) -> String;

    /// Extra display text. For paired media this usually carries the
    /// hardware address.
    fn display_info(&self) -> Option<String> {
        None
    }

    /// Physical medium.
    fn kind(&self) -> TransportKind;

    /// Current connection state.
    fn state(&self) -> TransportState;

    /// Request a connection.
    async fn connect(&self) -> Result<()>;

    /// Request a disconnection.
    async fn disconnect(&self) -> Result<()>;
}

/// A transport state-change notification.
#[derive(Debug, Clone)]
pub struct TransportChanged {
    /// The transport that changed.
    pub transport: Arc<dyn Transport>,
    /// Its new state.
    pub state: TransportState,
}

/// Enumerates transports and raises their state changes.
#[async_trait]
pub trait TransportsManager: Send + Sync {
    /// Subscribe to transport state changes.
    fn subscribe(&self) -> broadcast::Receiver<TransportChanged>;

    /// Every transport currently enumerated, in any state.
    fn enumerate(&self) -> Vec<Arc<dyn Transport>>;

    /// Whether hardware-address pairing is available on this platform.
    fn can_pair(&self) -> bool {
        false
    }

    /// Pair the device with the given hardware address.
    async fn pair(&self, address: &str) -> Result<()>;

    /// Remove a pairing.
    async fn unpair(&self, address: &str) -> Result<()>;
}

/// What an identity query over a transport returned.
#[derive(Debug, Clone, Default)]
pub struct ReaderIdentity {
    /// Serial number. `None` when the reader could not be identified, for
    /// example a second link to a reader that is already connected.
    pub serial_number: Option<String>,
    /// Capabilities the reader offers over this transport.
    pub capabilities: Capabilities,
}

impl ReaderIdentity {
    /// Identity with a serial number and capabilities.
    pub fn new(serial_number: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            serial_number: Some(serial_number.into()),
            capabilities,
        }
    }

    /// An identity that could not be resolved.
    pub fn unresolved() -> Self {
        Self::default()
    }
}

/// Queries reader identity over a connected transport.
#[async_trait]
pub trait ReaderDriver: Send + Sync {
    /// Identify the reader reachable over `transport`.
    async fn identify(&self, transport: &Arc<dyn Transport>) -> Result<ReaderIdentity>;
}

/// Lifecycle shared by every reader capability.
///
/// A run is `enable`, `start`, `stop`, `disable`; each call suspends until
/// the reader confirms it.
#[async_trait]
pub trait ReaderOperation: Send + Sync {
    /// Arm the operation.
    async fn enable(&self) -> Result<()>;

    /// Run the configured operation.
    async fn start(&self) -> Result<()>;

    /// Stop a running operation.
    async fn stop(&self) -> Result<()>;

    /// Disarm the operation.
    async fn disable(&self) -> Result<()>;

    /// Lowest antenna output power in dBm.
    fn minimum_output_power(&self) -> i32;

    /// Highest antenna output power in dBm.
    fn maximum_output_power(&self) -> i32;
}

/// Reports observation batches while enabled.
pub trait InventoryOperation: ReaderOperation {
    /// Current filter.
    fn filter(&self) -> TagFilter;

    /// Replace the filter used by the next run.
    fn set_filter(&self, filter: TagFilter);

    /// Subscribe to observation batches.
    fn subscribe(&self) -> broadcast::Receiver<TransponderBatch>;
}

/// Reads or writes tag memory.
pub trait TransponderAccessOperation: ReaderOperation {
    /// Configure which tags, what access (`None` means inventory only), and
    /// which fields are reported.
    fn configure(&self, filter: TagFilter, access: Option<TagAccess>);

    /// Per-tag results of the most recent run.
    fn transponders(&self) -> Vec<TransponderData>;

    /// Subscribe to per-tag results as they arrive.
    fn subscribe(&self) -> broadcast::Receiver<TransponderData>;
}

/// Reader-side barcode engine.
pub trait BarcodeOperation: ReaderOperation {
    /// Subscribe to scans.
    fn subscribe(&self) -> broadcast::Receiver<BarcodeScan>;
}

/// Battery level and charge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Charge level, 0-100.
    pub level: u8,
    /// Whether the reader is charging.
    pub charging: bool,
}

/// Reports reader battery status.
#[async_trait]
pub trait BatteryOperation: Send + Sync {
    /// Query the battery.
    async fn battery_status(&self) -> Result<BatteryStatus>;
}

/// Barcode scanner built into the host.
#[async_trait]
pub trait HostBarcodeSource: Send + Sync {
    /// Whether the host has a scanner.
    fn is_available(&self) -> bool;

    /// Whether scanning is enabled.
    fn is_enabled(&self) -> bool;

    /// Enable scanning.
    async fn enable(&self) -> Result<()>;

    /// Disable scanning, cancelling any pending scan.
    async fn disable(&self) -> Result<()>;

    /// Subscribe to scans.
    fn subscribe(&self) -> broadcast::Receiver<BarcodeScan>;
}
