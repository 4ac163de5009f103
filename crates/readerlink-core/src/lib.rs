//! Reader session management and tag inventory for RFID readers.
//!
//! This crate sits between an external transport and command library and
//! the application. It binds transports to logical readers, keeps a single
//! active reader, folds observation batches into a deduplicated inventory
//! and drives multi-step tag access transactions.
//!
//! # Features
//!
//! - **Reader sessions**: identify readers over any transport, merge
//!   duplicate links to the same reader, track the active reader
//! - **Serialized state**: one worker task owns all session state and
//!   drains transport notifications and requests in order
//! - **Inventory**: unique tags with seen counts, timestamps, normalized
//!   signal strength and per-pass statistics
//! - **Configuration**: change-tracked inventory parameters pushed to the
//!   active reader
//! - **Tag access**: generic memory reads and writes, and a proximity EPC
//!   change with write verification
//! - **Barcodes**: host and reader scans, Bluetooth pairing from a label
//! - **Mocks**: simulated transports, readers and tags for tests
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use readerlink_core::mock::{MockReaderBuilder, MockReaderDriver, MockTransportsManager};
//! use readerlink_core::{ManagerConfig, ReaderManager, Transport};
//! use readerlink_types::TransportKind;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transports = Arc::new(MockTransportsManager::new());
//!     let usb = transports.add("usb-1", TransportKind::Usb);
//!
//!     let driver = MockReaderDriver::new();
//!     driver.register("usb-1", &MockReaderBuilder::new().serial("1128-001").build());
//!
//!     let cancel = CancellationToken::new();
//!     let (manager, worker) = ReaderManager::start(
//!         transports,
//!         Arc::new(driver),
//!         ManagerConfig::default(),
//!         cancel.clone(),
//!     )?;
//!
//!     let mut events = manager.subscribe();
//!     usb.connect().await?;
//!     println!("{:?}", events.recv().await?);
//!
//!     cancel.cancel();
//!     worker.await?;
//!     Ok(())
//! }
//! ```

pub mod barcode;
pub mod configuration;
pub mod configurator;
pub mod epc_changer;
pub mod error;
pub mod events;
pub mod inventory;
pub mod item;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod reader;
pub mod session;
pub mod signal;
pub mod statistics;
pub mod tag_access;
pub mod traits;

pub use readerlink_types as types;

pub use barcode::{BarcodeLog, BarcodeScan, bluetooth_address_from_barcode};
pub use configuration::{InventoryConfiguration, InventorySettings};
pub use configurator::InventoryConfigurator;
pub use epc_changer::{EpcChangeOutcome, EpcChangerConfig, ProximityEpcChanger};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, ProgressReceiver, ProgressReporter, SessionEvent};
pub use inventory::TransponderInventory;
pub use item::{IdentifiedItem, NO_SIGNAL};
pub use manager::{ManagerConfig, ReaderManager};
pub use monitor::TransponderMonitor;
pub use reader::{Capabilities, Reader, ReaderId};
pub use session::{ActiveReaderSnapshot, ReaderSession, SessionCommand, UnidentifiedTransportPolicy};
pub use signal::{SignalNormalization, SignalNormalizer, SignalRange};
pub use statistics::InventoryStatistics;
pub use tag_access::TagReaderWriter;
pub use traits::{
    BarcodeOperation, BatteryOperation, BatteryStatus, HostBarcodeSource, InventoryOperation,
    ReaderDriver, ReaderIdentity, ReaderOperation, TransponderAccessOperation, Transport,
    TransportChanged, TransportsManager,
};
