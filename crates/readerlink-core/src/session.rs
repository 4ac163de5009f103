//! Reader identity and active reader state.
//!
//! [`ReaderSession`] binds transports to logical readers and owns the single
//! active reader selection. It reacts to transport state changes one at a
//! time; [`crate::manager::ReaderManager`] runs it inside a single worker
//! task so every mutation is serialized with the transport event stream.
//!
//! # Transport handling
//!
//! | Transport state | Owned by a reader | Action |
//! |-----------------|-------------------|--------|
//! | Connected | no | Create a reader, identify, merge or register, announce |
//! | Connected | yes | Re-identify, announce, activate if nothing is active |
//! | Lost, Disconnecting, Disconnected | yes | Release the active reader if it is this one, announce |
//! | Interrupted | yes | Logged only |

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use readerlink_types::{ReaderState, TransportState};

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SessionEvent};
use crate::reader::{Reader, same_reader};
use crate::traits::{ReaderDriver, ReaderIdentity, Transport};

/// What to do with a connected transport whose reader cannot be identified.
///
/// This typically happens when a second link to an already connected reader
/// comes up, for example Bluetooth while USB is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnidentifiedTransportPolicy {
    /// Disconnect the transport and discard the reader.
    #[default]
    Disconnect,
    /// Leave the transport up but do not register a reader.
    Ignore,
    /// Register an unnamed reader. Unnamed readers never merge.
    Register,
}

/// The active reader and the state of the selection.
#[derive(Debug, Clone, Default)]
pub struct ActiveReaderSnapshot {
    pub reader: Option<Arc<Reader>>,
    pub state: ReaderState,
}

impl ActiveReaderSnapshot {
    /// A snapshot of `reader` fully bound.
    pub fn connected(reader: Arc<Reader>) -> Self {
        Self {
            reader: Some(reader),
            state: ReaderState::Connected,
        }
    }
}

/// Requests handled by the session worker.
#[derive(Debug)]
pub enum SessionCommand {
    /// A transport changed state.
    TransportChanged {
        transport: Arc<dyn Transport>,
        state: TransportState,
    },
    /// Select a reader (or none) as the active reader.
    SetActiveReader {
        reader: Option<Arc<Reader>>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Tear down every transport bound to a reader.
    DisconnectReader {
        reader: Arc<Reader>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// List known readers.
    Readers {
        reply: oneshot::Sender<Vec<Arc<Reader>>>,
    },
}

/// Known readers, their transports and the active reader.
pub struct ReaderSession {
    driver: Arc<dyn ReaderDriver>,
    policy: UnidentifiedTransportPolicy,
    readers: Vec<Arc<Reader>>,
    active: Option<Arc<Reader>>,
    active_state: ReaderState,
    events: EventDispatcher,
    active_watch: watch::Sender<ActiveReaderSnapshot>,
    /// Last state handled per transport id.
    transport_states: HashMap<String, TransportState>,
}

impl ReaderSession {
    /// Create a session with no readers.
    pub fn new(
        driver: Arc<dyn ReaderDriver>,
        policy: UnidentifiedTransportPolicy,
        event_capacity: usize,
    ) -> Self {
        let (active_watch, _) = watch::channel(ActiveReaderSnapshot::default());
        Self {
            driver,
            policy,
            readers: Vec::new(),
            active: None,
            active_state: ReaderState::Disconnected,
            events: EventDispatcher::new(event_capacity),
            active_watch,
            transport_states: HashMap::new(),
        }
    }

    /// All known readers.
    pub fn readers(&self) -> Vec<Arc<Reader>> {
        self.readers.clone()
    }

    /// The active reader, if any.
    pub fn active_reader(&self) -> Option<Arc<Reader>> {
        self.active.clone()
    }

    /// State of the active reader selection.
    pub fn active_reader_state(&self) -> ReaderState {
        self.active_state
    }

    /// Subscribe to reader and active reader events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The dispatcher events are sent through.
    pub fn event_dispatcher(&self) -> EventDispatcher {
        self.events.clone()
    }

    /// Watch the active reader selection.
    pub fn watch_active_reader(&self) -> watch::Receiver<ActiveReaderSnapshot> {
        self.active_watch.subscribe()
    }

    /// Handle one queued command.
    pub async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::TransportChanged { transport, state } => {
                self.handle_transport_changed(transport, state).await;
            }
            SessionCommand::SetActiveReader { reader, reply } => {
                let _ = reply.send(self.set_active_reader(reader).await);
            }
            SessionCommand::DisconnectReader { reader, reply } => {
                let _ = reply.send(self.disconnect_reader(&reader).await);
            }
            SessionCommand::Readers { reply } => {
                let _ = reply.send(self.readers());
            }
        }
    }

    /// React to a transport state change.
    pub async fn handle_transport_changed(
        &mut self,
        transport: Arc<dyn Transport>,
        state: TransportState,
    ) {
        debug!("Transport {} is {}", transport.id(), state);
        self.transport_states
            .insert(transport.id().to_string(), state);

        let Some(reader) = self.reader_for_transport(transport.id()) else {
            if state == TransportState::Connected {
                self.identify_reader(transport).await;
            }
            return;
        };

        match state {
            TransportState::Connected => {
                let rebind = self.refresh_reader(&reader).await;
                self.announce(&reader, ReaderState::Connected);
                self.settle_active(reader, rebind);
            }
            TransportState::Lost | TransportState::Disconnecting | TransportState::Disconnected => {
                let reader_state = ReaderState::from_transport(state).unwrap_or_default();
                reader.resolve_preferred_transport();
                if same_reader(self.active.as_ref(), Some(&reader)) {
                    self.replace_active(None);
                }
                self.announce(&reader, reader_state);
            }
            TransportState::Interrupted => {
                info!(
                    "Transport {} to {} interrupted, waiting for it to recover",
                    transport.id(),
                    reader
                );
            }
            TransportState::Available | TransportState::Connecting => {}
        }
    }

    /// Replay the current state of every transport whose last handled
    /// state is out of date.
    ///
    /// Used after transport notifications were missed. Unknown transports
    /// are only replayed when connected.
    pub async fn resync(&mut self, transports: Vec<Arc<dyn Transport>>) {
        let mut replayed = 0;
        for transport in transports {
            let state = transport.state();
            let stale = match self.transport_states.get(transport.id()) {
                Some(&handled) => handled != state,
                None => state == TransportState::Connected,
            };
            if stale {
                replayed += 1;
                self.handle_transport_changed(transport, state).await;
            }
        }
        info!("Resynchronised {} transports", replayed);
    }

    /// Select `reader` (or none) as the active reader.
    ///
    /// The previous reader is driven through Disconnecting then Disconnected,
    /// and the new one through Connecting then Connected, each raising
    /// [`SessionEvent::ActiveReaderChanged`].
    pub async fn set_active_reader(&mut self, reader: Option<Arc<Reader>>) -> Result<()> {
        if let Some(reader) = &reader {
            if !self.readers.iter().any(|r| r.id() == reader.id()) {
                return Err(Error::UnknownReader(reader.display_name()));
            }
        }
        self.replace_active(reader);
        Ok(())
    }

    /// Ask the transport layer to disconnect every transport of `reader`.
    ///
    /// Reader and active reader state follow from the resulting transport
    /// notifications.
    pub async fn disconnect_reader(&self, reader: &Arc<Reader>) -> Result<()> {
        let transports = reader.transports();
        info!(
            "Disconnecting {} ({} transports)",
            reader,
            transports.len()
        );

        let results = join_all(transports.iter().map(|t| t.disconnect())).await;
        let mut first_error = None;
        for (transport, result) in transports.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to disconnect transport {}: {}", transport.id(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn reader_for_transport(&self, transport_id: &str) -> Option<Arc<Reader>> {
        self.readers
            .iter()
            .find(|r| r.has_transport(transport_id))
            .cloned()
    }

    async fn identify_reader(&mut self, transport: Arc<dyn Transport>) {
        let reader = Arc::new(Reader::new());
        reader.add_transport(Arc::clone(&transport));

        let identity = match self.driver.identify(&transport).await {
            Ok(identity) => identity,
            Err(Error::IdentityUnresolved { .. }) => ReaderIdentity::unresolved(),
            Err(e) => {
                warn!("Identity query over {} failed: {}", transport.id(), e);
                ReaderIdentity::unresolved()
            }
        };
        reader.apply_identity(identity);
        reader.resolve_preferred_transport();

        let mut rebind = false;
        let reader = match reader.serial_number() {
            Some(serial) => {
                let existing = self
                    .readers
                    .iter()
                    .find(|r| r.serial_number().as_deref() == Some(serial.as_str()))
                    .cloned();
                match existing {
                    Some(existing) => {
                        reader.remove_transport(transport.id());
                        reader.dispose();
                        existing.add_transport(Arc::clone(&transport));
                        rebind = self.refresh_reader(&existing).await;
                        info!("Merged transport {} into reader {}", transport.id(), serial);
                        existing
                    }
                    None => {
                        info!("Identified reader {} over {}", serial, transport.id());
                        self.readers.push(Arc::clone(&reader));
                        reader
                    }
                }
            }
            None => match self.policy {
                UnidentifiedTransportPolicy::Disconnect => {
                    info!(
                        "Unable to identify reader over {}, disconnecting it",
                        transport.id()
                    );
                    reader.dispose();
                    if let Err(e) = transport.disconnect().await {
                        warn!("Failed to disconnect transport {}: {}", transport.id(), e);
                    }
                    return;
                }
                UnidentifiedTransportPolicy::Ignore => {
                    debug!("Ignoring unidentified transport {}", transport.id());
                    reader.dispose();
                    return;
                }
                UnidentifiedTransportPolicy::Register => {
                    info!("Registering unidentified reader over {}", transport.id());
                    self.readers.push(Arc::clone(&reader));
                    reader
                }
            },
        };

        self.announce(&reader, ReaderState::Connected);
        self.settle_active(reader, rebind);
    }

    /// Activate `reader` if nothing is active, or repeat the hand-over when
    /// the active reader's capability objects were replaced.
    fn settle_active(&mut self, reader: Arc<Reader>, capabilities_changed: bool) {
        if self.active.is_none() {
            self.activate(reader);
        } else if capabilities_changed && same_reader(self.active.as_ref(), Some(&reader)) {
            info!("Capabilities of {} changed, rebinding", reader);
            self.transition_active(ReaderState::Disconnecting);
            self.transition_active(ReaderState::Disconnected);
            self.transition_active(ReaderState::Connecting);
            self.transition_active(ReaderState::Connected);
        }
    }

    /// Re-identify a reader over its preferred transport.
    ///
    /// Returns whether its capability objects were replaced.
    async fn refresh_reader(&self, reader: &Arc<Reader>) -> bool {
        let Some(transport) = reader.resolve_preferred_transport() else {
            debug!("{} has no connected transport to refresh over", reader);
            return false;
        };
        match self.driver.identify(&transport).await {
            Ok(identity) if identity.serial_number.is_some() => reader.apply_identity(identity),
            Ok(_) | Err(Error::IdentityUnresolved { .. }) => {
                debug!("{} did not identify over {}", reader, transport.id());
                false
            }
            Err(e) => {
                warn!("Refreshing {} over {} failed: {}", reader, transport.id(), e);
                false
            }
        }
    }

    fn activate(&mut self, reader: Arc<Reader>) {
        self.replace_active(Some(reader));
    }

    fn replace_active(&mut self, reader: Option<Arc<Reader>>) {
        if same_reader(self.active.as_ref(), reader.as_ref()) {
            return;
        }

        if self.active.is_some() {
            self.transition_active(ReaderState::Disconnecting);
            self.transition_active(ReaderState::Disconnected);
        }

        self.active = reader;
        match &self.active {
            Some(reader) => {
                info!("Active reader is now {}", reader);
                self.transition_active(ReaderState::Connecting);
                self.transition_active(ReaderState::Connected);
            }
            None => {
                info!("No active reader");
                self.publish_active();
            }
        }
    }

    fn transition_active(&mut self, state: ReaderState) {
        self.active_state = state;
        self.publish_active();
        if let Some(reader) = &self.active {
            debug!("Active reader {} is {}", reader, state);
            self.events.send(SessionEvent::ActiveReaderChanged {
                reader: Arc::clone(reader),
                state,
            });
        }
    }

    fn publish_active(&self) {
        self.active_watch.send_replace(ActiveReaderSnapshot {
            reader: self.active.clone(),
            state: self.active_state,
        });
    }

    fn announce(&self, reader: &Arc<Reader>, state: ReaderState) {
        debug!("Reader {} is {}", reader, state);
        self.events.send(SessionEvent::ReaderChanged {
            reader: Arc::clone(reader),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use crate::mock::{MockReaderBuilder, MockReaderDriver, MockTransport};
    use crate::monitor::TransponderMonitor;
    use crate::traits::InventoryOperation;
    use readerlink_types::{TransponderBatch, TransponderData, TransportKind};

    fn session_with(driver: MockReaderDriver, policy: UnidentifiedTransportPolicy) -> ReaderSession {
        ReaderSession::new(Arc::new(driver), policy, 64)
    }

    fn connected(id: &str, kind: TransportKind) -> Arc<MockTransport> {
        let transport = MockTransport::new(id, kind);
        transport.set_state(TransportState::Connected);
        transport
    }

    fn drain(rx: &mut EventReceiver) -> Vec<(bool, ReaderState)> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((event.is_active_reader_change(), event.state()));
        }
        events
    }

    #[tokio::test]
    async fn test_first_reader_becomes_active() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let mut rx = session.subscribe();

        session
            .handle_transport_changed(connected("usb-1", TransportKind::Usb), TransportState::Connected)
            .await;

        assert_eq!(session.readers().len(), 1);
        let active = session.active_reader().unwrap();
        assert_eq!(active.serial_number().as_deref(), Some("A1"));
        assert_eq!(session.active_reader_state(), ReaderState::Connected);
        assert_eq!(
            drain(&mut rx),
            vec![
                (false, ReaderState::Connected),
                (true, ReaderState::Connecting),
                (true, ReaderState::Connected),
            ]
        );
    }

    #[tokio::test]
    async fn test_unidentified_transport_is_disconnected() {
        let mut session = session_with(MockReaderDriver::new(), UnidentifiedTransportPolicy::Disconnect);
        let mut rx = session.subscribe();
        let transport = connected("bt-1", TransportKind::Bluetooth);

        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;

        assert!(session.readers().is_empty());
        assert!(session.active_reader().is_none());
        assert_eq!(transport.disconnect_count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unidentified_transport_ignored() {
        let mut session = session_with(MockReaderDriver::new(), UnidentifiedTransportPolicy::Ignore);
        let transport = connected("bt-1", TransportKind::Bluetooth);

        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;

        assert!(session.readers().is_empty());
        assert_eq!(transport.disconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_unidentified_readers_registered_and_never_merged() {
        let mut session = session_with(MockReaderDriver::new(), UnidentifiedTransportPolicy::Register);

        session
            .handle_transport_changed(connected("bt-1", TransportKind::Bluetooth), TransportState::Connected)
            .await;
        session
            .handle_transport_changed(connected("bt-2", TransportKind::Bluetooth), TransportState::Connected)
            .await;

        let readers = session.readers();
        assert_eq!(readers.len(), 2);
        assert!(readers.iter().all(|r| !r.is_identified()));
    }

    #[tokio::test]
    async fn test_identify_failure_follows_policy() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        driver.set_should_fail(true);
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let transport = connected("usb-1", TransportKind::Usb);

        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;

        assert!(session.readers().is_empty());
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_same_serial() {
        let driver = MockReaderDriver::new();
        let mock = MockReaderBuilder::new().serial("A1").build();
        driver.register("usb-1", &mock);
        driver.register("bt-1", &mock);
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);

        session
            .handle_transport_changed(connected("bt-1", TransportKind::Bluetooth), TransportState::Connected)
            .await;
        let mut rx = session.subscribe();
        session
            .handle_transport_changed(connected("usb-1", TransportKind::Usb), TransportState::Connected)
            .await;

        let readers = session.readers();
        assert_eq!(readers.len(), 1);
        assert_eq!(readers[0].transports().len(), 2);
        assert_eq!(readers[0].preferred_transport().unwrap().id(), "usb-1");
        // Already active: only the merged reader is announced.
        assert_eq!(drain(&mut rx), vec![(false, ReaderState::Connected)]);
    }

    #[tokio::test]
    async fn test_merge_with_new_capabilities_rebinds_active_reader() {
        let over_bluetooth = MockReaderBuilder::new().serial("A1").build();
        let over_usb = MockReaderBuilder::new().serial("A1").build();
        let bt_inventory = over_bluetooth.inventory.clone().unwrap();
        let usb_inventory = over_usb.inventory.clone().unwrap();
        let driver = MockReaderDriver::new();
        driver.register("bt-1", &over_bluetooth);
        driver.register("usb-1", &over_usb);
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let mut events = session.subscribe();
        let monitor = TransponderMonitor::default();
        let mut batches = monitor.subscribe();

        session
            .handle_transport_changed(connected("bt-1", TransportKind::Bluetooth), TransportState::Connected)
            .await;
        while let Ok(event) = events.try_recv() {
            monitor.handle_session_event(&event).await;
        }
        assert!(bt_inventory.is_enabled());

        session
            .handle_transport_changed(connected("usb-1", TransportKind::Usb), TransportState::Connected)
            .await;
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            monitor.handle_session_event(&event).await;
            seen.push((event.is_active_reader_change(), event.state()));
        }
        assert_eq!(
            seen,
            vec![
                (false, ReaderState::Connected),
                (true, ReaderState::Disconnecting),
                (true, ReaderState::Disconnected),
                (true, ReaderState::Connecting),
                (true, ReaderState::Connected),
            ]
        );

        let active = session.active_reader().unwrap();
        assert_eq!(session.readers().len(), 1);
        assert_eq!(session.active_reader_state(), ReaderState::Connected);
        assert!(!bt_inventory.is_enabled());
        assert!(usb_inventory.is_enabled());
        let usb_op: Arc<dyn InventoryOperation> = usb_inventory.clone();
        assert!(std::ptr::addr_eq(
            Arc::as_ptr(&active.inventory().unwrap()),
            Arc::as_ptr(&usb_op)
        ));

        assert!(usb_inventory.emit(TransponderBatch::new(vec![TransponderData::new("3008")], true)));
        let batch = tokio::time::timeout(std::time::Duration::from_secs(1), batches.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.transponders[0].epc, "3008");
    }

    #[tokio::test]
    async fn test_resync_replays_missed_changes() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        driver.register("usb-2", &MockReaderBuilder::new().serial("B2").build());
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let usb1 = connected("usb-1", TransportKind::Usb);
        session
            .handle_transport_changed(usb1.clone(), TransportState::Connected)
            .await;

        // Nothing changed: nothing replayed.
        let mut rx = session.subscribe();
        session.resync(vec![usb1.clone()]).await;
        assert!(drain(&mut rx).is_empty());

        // usb-1 dropped and usb-2 came up without a notification reaching us.
        usb1.set_state(TransportState::Lost);
        let usb2 = connected("usb-2", TransportKind::Usb);
        let idle = MockTransport::new("bt-9", TransportKind::Bluetooth);
        session.resync(vec![usb1.clone(), usb2.clone(), idle]).await;

        assert_eq!(session.readers().len(), 2);
        let active = session.active_reader().unwrap();
        assert_eq!(active.serial_number().as_deref(), Some("B2"));
        assert_eq!(
            drain(&mut rx),
            vec![
                (true, ReaderState::Disconnecting),
                (true, ReaderState::Disconnected),
                (false, ReaderState::Lost),
                (false, ReaderState::Connected),
                (true, ReaderState::Connecting),
                (true, ReaderState::Connected),
            ]
        );
    }

    #[tokio::test]
    async fn test_lost_active_reader_is_released() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let transport = connected("usb-1", TransportKind::Usb);
        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;

        let mut rx = session.subscribe();
        transport.set_state(TransportState::Lost);
        session
            .handle_transport_changed(transport.clone(), TransportState::Lost)
            .await;

        assert!(session.active_reader().is_none());
        assert_eq!(session.active_reader_state(), ReaderState::Disconnected);
        assert_eq!(session.readers().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                (true, ReaderState::Disconnecting),
                (true, ReaderState::Disconnected),
                (false, ReaderState::Lost),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnected_reader_is_reactivated() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        let driver = Arc::new(driver);
        let mut session = ReaderSession::new(driver.clone(), UnidentifiedTransportPolicy::Disconnect, 64);
        let transport = connected("usb-1", TransportKind::Usb);

        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;
        transport.set_state(TransportState::Disconnected);
        session
            .handle_transport_changed(transport.clone(), TransportState::Disconnected)
            .await;
        transport.set_state(TransportState::Connected);
        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;

        assert_eq!(session.readers().len(), 1);
        assert!(session.active_reader().is_some());
        assert_eq!(driver.identify_count(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_is_ignored() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let transport = connected("usb-1", TransportKind::Usb);
        session
            .handle_transport_changed(transport.clone(), TransportState::Connected)
            .await;

        let mut rx = session.subscribe();
        session
            .handle_transport_changed(transport, TransportState::Interrupted)
            .await;

        assert!(session.active_reader().is_some());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_set_active_reader_four_steps() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        driver.register("usb-2", &MockReaderBuilder::new().serial("B2").build());
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        session
            .handle_transport_changed(connected("usb-1", TransportKind::Usb), TransportState::Connected)
            .await;
        session
            .handle_transport_changed(connected("usb-2", TransportKind::Usb), TransportState::Connected)
            .await;

        let first = session.active_reader().unwrap();
        let second = session
            .readers()
            .into_iter()
            .find(|r| r.id() != first.id())
            .unwrap();

        let mut rx = session.subscribe();
        session.set_active_reader(Some(second.clone())).await.unwrap();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let steps: Vec<_> = events
            .iter()
            .map(|e| (e.reader().id(), e.state()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (first.id(), ReaderState::Disconnecting),
                (first.id(), ReaderState::Disconnected),
                (second.id(), ReaderState::Connecting),
                (second.id(), ReaderState::Connected),
            ]
        );

        // Selecting the same reader again is a no-op.
        session.set_active_reader(Some(second)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_unknown_reader_fails() {
        let mut session = session_with(MockReaderDriver::new(), UnidentifiedTransportPolicy::Disconnect);
        let result = session.set_active_reader(Some(Arc::new(Reader::new()))).await;
        assert!(matches!(result, Err(Error::UnknownReader(_))));
    }

    #[tokio::test]
    async fn test_disconnect_reader_tears_down_all_transports() {
        let driver = MockReaderDriver::new();
        let mock = MockReaderBuilder::new().serial("A1").build();
        driver.register("usb-1", &mock);
        driver.register("bt-1", &mock);
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let usb = connected("usb-1", TransportKind::Usb);
        let bt = connected("bt-1", TransportKind::Bluetooth);
        session.handle_transport_changed(usb.clone(), TransportState::Connected).await;
        session.handle_transport_changed(bt.clone(), TransportState::Connected).await;

        let reader = session.active_reader().unwrap();
        session.disconnect_reader(&reader).await.unwrap();

        assert_eq!(usb.disconnect_count(), 1);
        assert_eq!(bt.disconnect_count(), 1);
        // State follows the transport notifications, not the request.
        assert!(session.active_reader().is_some());
    }

    #[tokio::test]
    async fn test_watch_tracks_active_reader() {
        let driver = MockReaderDriver::new();
        driver.register("usb-1", &MockReaderBuilder::new().serial("A1").build());
        let mut session = session_with(driver, UnidentifiedTransportPolicy::Disconnect);
        let watch = session.watch_active_reader();
        assert!(watch.borrow().reader.is_none());

        session
            .handle_transport_changed(connected("usb-1", TransportKind::Usb), TransportState::Connected)
            .await;
        let snapshot = watch.borrow().clone();
        assert_eq!(snapshot.state, ReaderState::Connected);
        assert!(snapshot.reader.is_some());

        session.set_active_reader(None).await.unwrap();
        assert!(watch.borrow().reader.is_none());
        assert_eq!(watch.borrow().state, ReaderState::Disconnected);
    }
}
