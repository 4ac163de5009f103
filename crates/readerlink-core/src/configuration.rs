//! Desired inventory parameters with change tracking.

use serde::{Deserialize, Serialize};

/// Output power bounds assumed until a reader reports its own, in dBm.
pub const DEFAULT_MINIMUM_OUTPUT_POWER: i32 = 10;
pub const DEFAULT_MAXIMUM_OUTPUT_POWER: i32 = 29;

/// A value that remembers what was last applied to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked<T> {
    original: T,
    value: T,
}

impl<T: Copy + PartialEq> Tracked<T> {
    fn new(default: T) -> Self {
        Self {
            original: default,
            value: default,
        }
    }

    fn get(&self) -> T {
        self.value
    }

    fn set(&mut self, value: T) {
        self.value = value;
    }

    fn is_changed(&self) -> bool {
        self.original != self.value
    }

    fn commit(&mut self) {
        self.original = self.value;
    }
}

macro_rules! tracked_flags {
    ($($(#[$doc:meta])* $field:ident / $setter:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $field(&self) -> bool {
                self.$field.get()
            }

            pub fn $setter(&mut self, include: bool) {
                self.$field.set(include);
            }
        )*

        fn flags_changed(&self) -> bool {
            false $(|| self.$field.is_changed())*
        }

        fn commit_flags(&mut self) {
            $(self.$field.commit();)*
        }
    };
}

/// Inventory parameters to push to the active reader.
///
/// A fresh configuration reports [`is_changed`](Self::is_changed) until the
/// first [`update_all`](Self::update_all), so it is always applied once.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryConfiguration {
    include_channel_frequency: Tracked<bool>,
    include_checksum: Tracked<bool>,
    include_date_time: Tracked<bool>,
    include_epc: Tracked<bool>,
    include_index: Tracked<bool>,
    include_pc: Tracked<bool>,
    include_phase: Tracked<bool>,
    include_rssi: Tracked<bool>,
    output_power: Tracked<i32>,
    minimum_output_power: i32,
    maximum_output_power: i32,
    pristine: bool,
}

impl InventoryConfiguration {
    pub fn new() -> Self {
        Self {
            include_channel_frequency: Tracked::new(false),
            include_checksum: Tracked::new(false),
            include_date_time: Tracked::new(false),
            include_epc: Tracked::new(true),
            include_index: Tracked::new(false),
            include_pc: Tracked::new(false),
            include_phase: Tracked::new(false),
            include_rssi: Tracked::new(false),
            output_power: Tracked::new(DEFAULT_MAXIMUM_OUTPUT_POWER),
            minimum_output_power: DEFAULT_MINIMUM_OUTPUT_POWER,
            maximum_output_power: DEFAULT_MAXIMUM_OUTPUT_POWER,
            pristine: true,
        }
    }

    tracked_flags! {
        include_channel_frequency / set_include_channel_frequency,
        include_checksum / set_include_checksum,
        /// Time-stamp each observation. Tracked but has no device field.
        include_date_time / set_include_date_time,
        include_epc / set_include_epc,
        include_index / set_include_index,
        include_pc / set_include_pc,
        include_phase / set_include_phase,
        include_rssi / set_include_rssi,
    }

    /// Output power in dBm.
    pub fn output_power(&self) -> i32 {
        self.output_power.get()
    }

    /// Set the output power, clamped to the device bounds.
    pub fn set_output_power(&mut self, power: i32) {
        self.output_power
            .set(power.clamp(self.minimum_output_power, self.maximum_output_power));
    }

    pub fn minimum_output_power(&self) -> i32 {
        self.minimum_output_power
    }

    pub fn maximum_output_power(&self) -> i32 {
        self.maximum_output_power
    }

    /// Adopt a device's power bounds.
    ///
    /// An inverted range is normalized so the minimum never exceeds the
    /// maximum.
    pub fn set_power_bounds(&mut self, minimum: i32, maximum: i32) {
        self.minimum_output_power = minimum.min(maximum);
        self.maximum_output_power = maximum.max(minimum);
        let power = self.output_power();
        self.set_output_power(power);
    }

    /// Whether anything differs from what was last applied.
    pub fn is_changed(&self) -> bool {
        self.pristine || self.output_power.is_changed() || self.flags_changed()
    }

    /// Mark every value as applied.
    pub fn update_all(&mut self) {
        self.commit_flags();
        self.output_power.commit();
        self.pristine = false;
    }

    /// Apply file-level settings.
    pub fn apply_settings(&mut self, settings: &InventorySettings) {
        self.set_include_channel_frequency(settings.include_channel_frequency);
        self.set_include_checksum(settings.include_checksum);
        self.set_include_date_time(settings.include_date_time);
        self.set_include_epc(settings.include_epc);
        self.set_include_index(settings.include_index);
        self.set_include_pc(settings.include_pc);
        self.set_include_phase(settings.include_phase);
        self.set_include_rssi(settings.include_rssi);
        if let Some(power) = settings.output_power {
            self.set_output_power(power);
        }
    }
}

impl Default for InventoryConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

/// Inventory report settings as stored in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    pub include_channel_frequency: bool,
    pub include_checksum: bool,
    pub include_date_time: bool,
    pub include_epc: bool,
    pub include_index: bool,
    pub include_pc: bool,
    pub include_phase: bool,
    pub include_rssi: bool,
    /// Output power in dBm. `None` uses the reader's maximum.
    pub output_power: Option<i32>,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            include_channel_frequency: false,
            include_checksum: false,
            include_date_time: false,
            include_epc: true,
            include_index: false,
            include_pc: false,
            include_phase: false,
            include_rssi: true,
            output_power: None,
        }
    }
}
