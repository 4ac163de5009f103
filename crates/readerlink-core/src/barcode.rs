//! Barcode scans from the host and from readers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::warn;

use crate::item::IdentifiedItem;

/// Source tag of scans made by the host's own scanner.
pub const HOST_SOURCE: &str = "host";

/// Source tag of scans made by a reader's barcode engine.
pub const READER_SOURCE: &str = "reader";

/// A scanned barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeScan {
    pub barcode: String,
    pub timestamp: OffsetDateTime,
}

impl BarcodeScan {
    pub fn new(barcode: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            barcode: barcode.into(),
            timestamp,
        }
    }

    /// A scan time-stamped now.
    pub fn now(barcode: &str) -> Self {
        Self::new(barcode, OffsetDateTime::now_utc())
    }
}

/// Find a Bluetooth hardware address (`XX:XX:XX:XX:XX:XX`) in a barcode.
///
/// Reader labels often print the address next to other text. The first
/// match is returned upper-cased.
///
/// # Examples
///
/// ```
/// use readerlink_core::bluetooth_address_from_barcode;
///
/// assert_eq!(
///     bluetooth_address_from_barcode("BT:00:12:f3:2a:b4:07").as_deref(),
///     Some("00:12:F3:2A:B4:07"),
/// );
/// assert_eq!(bluetooth_address_from_barcode("5012345678900"), None);
/// ```
pub fn bluetooth_address_from_barcode(barcode: &str) -> Option<String> {
    const LENGTH: usize = 17;

    let bytes = barcode.as_bytes();
    bytes
        .windows(LENGTH)
        .find(|window| {
            window.iter().enumerate().all(|(i, b)| {
                if i % 3 == 2 {
                    *b == b':'
                } else {
                    b.is_ascii_hexdigit()
                }
            })
        })
        .map(|window| String::from_utf8_lossy(window).to_ascii_uppercase())
}

/// Unique barcodes with an activity log.
#[derive(Debug, Default)]
pub struct BarcodeLog {
    index: HashMap<(String, String), usize>,
    items: Vec<IdentifiedItem>,
    activity: Vec<String>,
}

impl BarcodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scan from `source`. Returns whether it was a new barcode for
    /// that source.
    pub fn record(&mut self, scan: &BarcodeScan, source: &str) -> bool {
        let key = (scan.barcode.clone(), source.to_string());
        let (index, new) = match self.index.get(&key) {
            Some(&index) => (index, false),
            None => {
                self.items
                    .push(IdentifiedItem::with_source(scan.barcode.clone(), source));
                let index = self.items.len() - 1;
                self.index.insert(key, index);
                (index, true)
            }
        };
        self.items[index].seen(Some(scan.timestamp));
        self.activity.push(format!("{}: {}", source, scan.barcode));
        new
    }

    /// Record every scan currently buffered in `receiver`.
    pub fn drain(&mut self, receiver: &mut broadcast::Receiver<BarcodeScan>, source: &str) -> usize {
        let mut recorded = 0;
        loop {
            match receiver.try_recv() {
                Ok(scan) => {
                    self.record(&scan, source);
                    recorded += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Missed {} {} barcode scans", skipped, source);
                }
                Err(_) => break,
            }
        }
        recorded
    }

    /// Unique barcodes in first-seen order.
    pub fn items(&self) -> &[IdentifiedItem] {
        &self.items
    }

    /// One line per scan, oldest first.
    pub fn activity(&self) -> &[String] {
        &self.activity
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.items.clear();
        self.activity.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::mock::{MockBarcodeOperation, MockHostBarcode};
    use crate::traits::{HostBarcodeSource, ReaderOperation};

    #[test]
    fn test_address_extraction() {
        assert_eq!(
            bluetooth_address_from_barcode("00:12:F3:2A:B4:07").as_deref(),
            Some("00:12:F3:2A:B4:07")
        );
        assert_eq!(
            bluetooth_address_from_barcode("SN1128 MAC 0a:1b:2c:3d:4e:5f end").as_deref(),
            Some("0A:1B:2C:3D:4E:5F")
        );
        assert_eq!(bluetooth_address_from_barcode("00:12:F3:2A:B4"), None);
        assert_eq!(bluetooth_address_from_barcode("00-12-F3-2A-B4-07"), None);
        assert_eq!(bluetooth_address_from_barcode("0G:12:F3:2A:B4:07"), None);
    }

    #[test]
    fn test_dedup_by_identifier_and_source() {
        let mut log = BarcodeLog::new();
        assert!(log.record(&BarcodeScan::now("5012345678900"), HOST_SOURCE));
        assert!(!log.record(&BarcodeScan::now("5012345678900"), HOST_SOURCE));
        assert!(log.record(&BarcodeScan::now("5012345678900"), READER_SOURCE));

        assert_eq!(log.items().len(), 2);
        assert_eq!(log.items()[0].seen_count(), 2);
        assert_eq!(log.items()[1].source(), Some("reader"));
        assert_eq!(
            log.activity(),
            &[
                "host: 5012345678900".to_string(),
                "host: 5012345678900".to_string(),
                "reader: 5012345678900".to_string(),
            ]
        );

        log.clear();
        assert!(log.items().is_empty());
        assert!(log.activity().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_and_reader_scans() {
        let host = MockHostBarcode::new();
        let mut host_scans = host.subscribe();
        host.enable().await.unwrap();
        host.set_next_barcode(Some("ABC-123"));
        assert!(host.initiate_scan());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let reader = MockBarcodeOperation::new();
        let mut reader_scans = crate::traits::BarcodeOperation::subscribe(&reader);
        reader.enable().await.unwrap();
        assert!(reader.emit("XYZ-9"));

        let mut log = BarcodeLog::new();
        assert_eq!(log.drain(&mut host_scans, HOST_SOURCE), 1);
        assert_eq!(log.drain(&mut reader_scans, READER_SOURCE), 1);
        assert_eq!(log.activity(), &["host: ABC-123".to_string(), "reader: XYZ-9".to_string()]);
    }
}
