//! Transponder inventory aggregation.
//!
//! [`TransponderInventory`] folds observation batches into a deduplicated,
//! first-seen ordered list of [`IdentifiedItem`]s with running
//! [`InventoryStatistics`]. Enablement is owned by the
//! [`TransponderMonitor`]; a disabled monitor means batches are dropped
//! without touching items or statistics.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use readerlink_types::TransponderBatch;

use crate::error::Result;
use crate::item::{IdentifiedItem, NO_SIGNAL};
use crate::monitor::TransponderMonitor;
use crate::signal::{SignalNormalization, SignalNormalizer};
use crate::statistics::InventoryStatistics;

/// Unique tags seen since the last clear.
pub struct TransponderInventory {
    monitor: Arc<TransponderMonitor>,
    signal: Box<dyn SignalNormalization>,
    statistics: InventoryStatistics,
    index: HashMap<String, usize>,
    items: Vec<IdentifiedItem>,
}

impl TransponderInventory {
    /// Create an empty inventory gated by `monitor`.
    pub fn new(monitor: Arc<TransponderMonitor>) -> Self {
        Self::with_normalizer(monitor, Box::new(SignalNormalizer::new()))
    }

    pub fn with_normalizer(
        monitor: Arc<TransponderMonitor>,
        signal: Box<dyn SignalNormalization>,
    ) -> Self {
        Self {
            monitor,
            signal,
            statistics: InventoryStatistics::new(),
            index: HashMap::new(),
            items: Vec::new(),
        }
    }

    /// Items in first-seen order.
    pub fn items(&self) -> &[IdentifiedItem] {
        &self.items
    }

    pub fn item(&self, identifier: &str) -> Option<&IdentifiedItem> {
        self.index.get(identifier).map(|&i| &self.items[i])
    }

    pub fn statistics(&self) -> &InventoryStatistics {
        &self.statistics
    }

    /// Set the free-text inventory mode shown with the statistics.
    pub fn set_inventory_mode(&mut self, mode: impl Into<String>) {
        self.statistics.inventory_mode = mode.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.monitor.is_enabled()
    }

    /// Enable or disable aggregation through the monitor.
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.monitor.set_enabled(enabled).await
    }

    /// Fold one batch into the inventory.
    ///
    /// Returns `false` if the batch was dropped because monitoring is
    /// disabled.
    pub fn ingest(&mut self, batch: &TransponderBatch) -> bool {
        if !self.monitor.is_enabled() {
            debug!("Inventory disabled, dropping {} observations", batch.len());
            return false;
        }

        let mut unique: u32 = 0;
        for transponder in &batch.transponders {
            let index = match self.index.get(&transponder.epc) {
                Some(&index) => index,
                None => {
                    unique = unique.saturating_add(1);
                    self.items.push(IdentifiedItem::new(transponder.epc.clone()));
                    let index = self.items.len() - 1;
                    self.index.insert(transponder.epc.clone(), index);
                    index
                }
            };

            let signal = match transponder.rssi {
                Some(rssi) => self.signal.normalize(Some(rssi)),
                None => NO_SIGNAL,
            };

            let item = &mut self.items[index];
            item.seen(transponder.timestamp);
            if let Some(channel_frequency) = transponder.channel_frequency {
                item.set_channel_frequency(channel_frequency);
            }
            if let Some(phase) = transponder.phase {
                item.set_phase(phase);
            }
            item.set_normalized_signal(signal);
        }

        self.statistics
            .update(unique, u32::try_from(batch.len()).unwrap_or(u32::MAX), batch.end_of_pass);
        true
    }

    /// Ingest every batch currently buffered in `receiver`.
    ///
    /// Returns the number of batches ingested.
    pub fn drain(&mut self, receiver: &mut broadcast::Receiver<TransponderBatch>) -> usize {
        let mut ingested = 0;
        loop {
            match receiver.try_recv() {
                Ok(batch) => {
                    if self.ingest(&batch) {
                        ingested += 1;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Inventory missed {} observation batches", skipped);
                }
                Err(_) => break,
            }
        }
        ingested
    }

    /// Forget every item, zero the statistics and reset the normalizer.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.statistics.clear();
        self.signal.reset();
    }

    /// Ingest batches from the monitor until cancelled.
    pub fn spawn_ingest(inventory: Arc<Mutex<Self>>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut batches = inventory.lock().await.monitor.subscribe();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = batches.recv() => match batch {
                        Ok(batch) => {
                            inventory.lock().await.ingest(&batch);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Inventory missed {} observation batches", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    use readerlink_types::TransponderData;

    fn inventory() -> TransponderInventory {
        TransponderInventory::new(Arc::new(TransponderMonitor::default()))
    }

    fn batch(epcs: &[&str], end_of_pass: bool) -> TransponderBatch {
        TransponderBatch::new(
            epcs.iter().map(|epc| TransponderData::new(*epc)).collect(),
            end_of_pass,
        )
    }

    #[test]
    fn test_dedup_across_batches() {
        let mut inventory = inventory();
        assert!(inventory.ingest(&batch(&["A", "B", "A"], false)));
        assert!(inventory.ingest(&batch(&["B", "C"], true)));

        let ids: Vec<_> = inventory.items().iter().map(|i| i.identifier()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(inventory.item("A").unwrap().seen_count(), 2);
        assert_eq!(inventory.item("B").unwrap().seen_count(), 2);

        let stats = inventory.statistics();
        assert_eq!(stats.total_unique_count, 3);
        assert_eq!(stats.total_seen_count, 5);
        assert_eq!(stats.last_scan_unique_count, 3);
        assert_eq!(stats.number_of_scans, 1);
    }

    #[test]
    fn test_timestamps_and_channel() {
        let mut inventory = inventory();
        let first = TransponderData::new("A")
            .at(datetime!(2026-03-01 10:00 UTC))
            .with_channel(865_700, 12);
        let second = TransponderData::new("A").at(datetime!(2026-03-01 10:01 UTC));
        inventory.ingest(&TransponderBatch::new(vec![first, second], true));

        let item = inventory.item("A").unwrap();
        assert_eq!(item.first_seen(), Some(datetime!(2026-03-01 10:00 UTC)));
        assert_eq!(item.last_seen(), Some(datetime!(2026-03-01 10:01 UTC)));
        // Absent channel data leaves the earlier values in place.
        assert_eq!(item.channel_frequency(), Some(865_700));
        assert_eq!(item.phase(), Some(12));
    }

    #[test]
    fn test_signal_or_sentinel() {
        let mut inventory = inventory();
        inventory.ingest(&TransponderBatch::new(
            vec![
                TransponderData::new("A").with_rssi(-30),
                TransponderData::new("B"),
            ],
            false,
        ));
        assert_eq!(inventory.item("A").unwrap().normalized_signal(), 1.0);
        assert_eq!(inventory.item("B").unwrap().normalized_signal(), NO_SIGNAL);
    }

    #[tokio::test]
    async fn test_disabled_drops_batches() {
        let mut inventory = inventory();
        inventory.set_enabled(false).await.unwrap();
        assert!(!inventory.ingest(&batch(&["A"], true)));
        assert!(inventory.items().is_empty());
        assert_eq!(inventory.statistics(), &InventoryStatistics::default());

        inventory.set_enabled(true).await.unwrap();
        assert!(inventory.ingest(&batch(&["A"], true)));
        assert_eq!(inventory.items().len(), 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut inventory = inventory();
        inventory.set_inventory_mode("Trigger");
        inventory.ingest(&TransponderBatch::new(
            vec![TransponderData::new("A").with_rssi(-10)],
            true,
        ));
        inventory.clear();

        assert!(inventory.items().is_empty());
        assert!(inventory.item("A").is_none());
        assert_eq!(inventory.statistics(), &InventoryStatistics::default());

        // The normalizer range is back to its seed.
        inventory.ingest(&TransponderBatch::new(
            vec![TransponderData::new("A").with_rssi(-30)],
            false,
        ));
        assert_eq!(inventory.item("A").unwrap().normalized_signal(), 1.0);
    }

    #[tokio::test]
    async fn test_drain_from_monitor() {
        let monitor = Arc::new(TransponderMonitor::default());
        let mut inventory = TransponderInventory::new(monitor.clone());
        let mut rx = monitor.subscribe();
        assert_eq!(inventory.drain(&mut rx), 0);

        let op = Arc::new(crate::mock::MockInventoryOperation::new());
        monitor.bind(Some(op.clone())).await.unwrap();
        op.emit(batch(&["A", "B"], true));
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while rx.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(inventory.drain(&mut rx), 1);
        assert_eq!(inventory.items().len(), 2);
    }
}

/// Property-based tests for inventory aggregation.
///
/// # Running Tests
///
/// ```bash
/// cargo test -p readerlink-core inventory::proptests
/// ```
#[cfg(test)]
mod proptests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use proptest::prelude::*;
    use readerlink_types::TransponderData;
    use time::{Duration, OffsetDateTime};

    fn batches() -> impl Strategy<Value = Vec<(Vec<u8>, bool)>> {
        // Identifiers are drawn from a small pool so repeats are common.
        proptest::collection::vec(
            (proptest::collection::vec(0u8..12, 0..20), any::<bool>()),
            0..12,
        )
    }

    proptest! {
        /// Items match the distinct identifiers seen, whatever the batching.
        #[test]
        fn items_are_distinct_identifiers(batches in batches()) {
            let mut inventory = TransponderInventory::new(Arc::new(TransponderMonitor::default()));
            let mut distinct = HashSet::new();
            let mut total = 0u32;

            for (ids, end_of_pass) in &batches {
                let batch = TransponderBatch::new(
                    ids.iter().map(|id| TransponderData::new(format!("{:04X}", id))).collect(),
                    *end_of_pass,
                );
                distinct.extend(ids.iter().copied());
                total += ids.len() as u32;
                inventory.ingest(&batch);
            }

            prop_assert_eq!(inventory.items().len(), distinct.len());
            prop_assert_eq!(inventory.statistics().total_unique_count as usize, distinct.len());
            prop_assert_eq!(inventory.statistics().total_seen_count, total);
        }

        /// Seen count is the number of observations; first and last seen
        /// follow the observation timestamps.
        #[test]
        fn seen_count_and_timestamps(ids in proptest::collection::vec(0u8..6, 1..60)) {
            let start = OffsetDateTime::UNIX_EPOCH + Duration::days(20_000);
            let mut inventory = TransponderInventory::new(Arc::new(TransponderMonitor::default()));
            let mut expected: HashMap<u8, (u32, OffsetDateTime, OffsetDateTime)> = HashMap::new();

            for (n, id) in ids.iter().enumerate() {
                let at = start + Duration::seconds(n as i64);
                let batch = TransponderBatch::new(
                    vec![TransponderData::new(format!("{:04X}", id)).at(at)],
                    false,
                );
                inventory.ingest(&batch);
                expected
                    .entry(*id)
                    .and_modify(|(count, _, last)| {
                        *count += 1;
                        *last = at;
                    })
                    .or_insert((1, at, at));
            }

            for (id, (count, first, last)) in expected {
                let item = inventory.item(&format!("{:04X}", id)).unwrap();
                prop_assert_eq!(item.seen_count(), count);
                prop_assert_eq!(item.first_seen(), Some(first));
                prop_assert_eq!(item.last_seen(), Some(last));
            }
        }

        /// Normalized signal always stays within [0, 1].
        #[test]
        fn signal_within_bounds(readings in proptest::collection::vec(-120i32..0, 1..40)) {
            let mut inventory = TransponderInventory::new(Arc::new(TransponderMonitor::default()));
            let batch = TransponderBatch::new(
                readings
                    .iter()
                    .enumerate()
                    .map(|(n, rssi)| TransponderData::new(format!("{:04X}", n)).with_rssi(*rssi))
                    .collect(),
                true,
            );
            inventory.ingest(&batch);
            for item in inventory.items() {
                prop_assert!((0.0..=1.0).contains(&item.normalized_signal()));
            }
        }
    }
}
