//! Pushes [`InventoryConfiguration`] to the active reader.

use std::sync::Arc;

use tracing::{debug, info};

use readerlink_types::{ReaderState, TagFields, TagFilter};

use crate::configuration::InventoryConfiguration;
use crate::events::SessionEvent;
use crate::reader::Reader;
use crate::traits::InventoryOperation;

/// Build the inventory filter described by a configuration.
///
/// The identifier is always reported. The date/time flag has no device
/// field.
pub fn filter_for(configuration: &InventoryConfiguration) -> TagFilter {
    let report = TagFields::EPC
        .with_if(configuration.include_channel_frequency(), TagFields::CHANNEL)
        .with_if(configuration.include_checksum(), TagFields::CRC)
        .with_if(configuration.include_index(), TagFields::INDEX)
        .with_if(configuration.include_pc(), TagFields::PC)
        .with_if(configuration.include_phase(), TagFields::PHASE)
        .with_if(configuration.include_rssi(), TagFields::RSSI);

    TagFilter::all()
        .at_power(configuration.output_power())
        .report(report)
}

/// Applies the inventory configuration to the active reader's inventory
/// capability.
#[derive(Default)]
pub struct InventoryConfigurator {
    configuration: InventoryConfiguration,
    operation: Option<Arc<dyn InventoryOperation>>,
}

impl InventoryConfigurator {
    pub fn new(configuration: InventoryConfiguration) -> Self {
        Self {
            configuration,
            operation: None,
        }
    }

    pub fn configuration(&self) -> &InventoryConfiguration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut InventoryConfiguration {
        &mut self.configuration
    }

    /// Whether there is an inventory capability to configure.
    pub fn can_configure(&self) -> bool {
        self.operation.is_some()
    }

    /// Bind to a reader's inventory capability and adopt its power bounds.
    pub fn rebind(&mut self, reader: Option<&Arc<Reader>>) {
        self.operation = reader.and_then(|r| r.inventory());
        if let Some(operation) = &self.operation {
            let minimum = operation.minimum_output_power();
            let maximum = operation.maximum_output_power();
            self.configuration.set_power_bounds(minimum, maximum);
            self.configuration.set_output_power(maximum);
            debug!("Inventory power bounds are {}..{} dBm", minimum, maximum);
        }
    }

    /// Follow an active reader transition.
    pub fn handle_session_event(&mut self, event: &SessionEvent) {
        let SessionEvent::ActiveReaderChanged { reader, state } = event else {
            return;
        };
        match state {
            ReaderState::Disconnecting => self.rebind(None),
            ReaderState::Connected => self.rebind(Some(reader)),
            _ => {}
        }
    }

    /// Push the configuration to the bound operation and commit it.
    ///
    /// Returns `false` when there is no inventory capability.
    pub fn configure(&mut self) -> bool {
        let Some(operation) = &self.operation else {
            return false;
        };
        let filter = filter_for(&self.configuration);
        info!(
            "Configuring inventory at {} dBm",
            filter.output_power.unwrap_or_default()
        );
        operation.set_filter(filter);
        self.configuration.update_all();
        true
    }
}
