//! Running inventory counters.

use serde::{Deserialize, Serialize};

/// Counts of observed and unique items for the current pass, the last
/// completed pass, and since the last clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStatistics {
    /// Free-text description of how the inventory is being run.
    pub inventory_mode: String,
    pub current_scan_seen_count: u32,
    pub current_scan_unique_count: u32,
    pub last_scan_seen_count: u32,
    pub last_scan_unique_count: u32,
    pub total_seen_count: u32,
    pub total_unique_count: u32,
    /// Completed passes.
    pub number_of_scans: u32,
}

impl InventoryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partial result; `end_pass` closes the current pass afterwards.
    ///
    /// Counters saturate at `u32::MAX`.
    pub fn update(&mut self, unique: u32, seen: u32, end_pass: bool) {
        self.current_scan_seen_count = self.current_scan_seen_count.saturating_add(seen);
        self.current_scan_unique_count = self.current_scan_unique_count.saturating_add(unique);
        self.total_seen_count = self.total_seen_count.saturating_add(seen);
        self.total_unique_count = self.total_unique_count.saturating_add(unique);

        if end_pass {
            self.end_pass();
        }
    }

    /// Move the current pass counts to the last pass and count the pass.
    pub fn end_pass(&mut self) {
        self.last_scan_seen_count = self.current_scan_seen_count;
        self.last_scan_unique_count = self.current_scan_unique_count;
        self.current_scan_seen_count = 0;
        self.current_scan_unique_count = 0;
        self.number_of_scans = self.number_of_scans.saturating_add(1);
    }

    /// Reset every counter and the inventory mode.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
