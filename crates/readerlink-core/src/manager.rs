//! Reader session worker and its handle.
//!
//! [`ReaderManager::start`] spawns a single task that owns the
//! [`ReaderSession`]. Transport notifications and API requests are both
//! funnelled into that task, so transport handling and active reader
//! changes never interleave.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use readerlink_types::{ReaderState, TransportState};

use crate::barcode::bluetooth_address_from_barcode;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver};
use crate::reader::Reader;
use crate::session::{ActiveReaderSnapshot, ReaderSession, SessionCommand, UnidentifiedTransportPolicy};
use crate::traits::{ReaderDriver, Transport, TransportChanged, TransportsManager};

/// Configuration for the reader manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Pending request capacity.
    pub command_capacity: usize,
    /// Handling of transports whose reader cannot be identified.
    pub unidentified_policy: UnidentifiedTransportPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            command_capacity: 32,
            unidentified_policy: UnidentifiedTransportPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Reject zero-capacity channels.
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be greater than 0"));
        }
        if self.command_capacity == 0 {
            return Err(Error::invalid_config("command_capacity must be greater than 0"));
        }
        Ok(())
    }
}

/// Handle to a running reader session.
///
/// Cheap to clone; every clone talks to the same worker.
#[derive(Clone)]
pub struct ReaderManager {
    commands: mpsc::Sender<SessionCommand>,
    events: EventDispatcher,
    active: watch::Receiver<ActiveReaderSnapshot>,
    transports: Arc<dyn TransportsManager>,
}

impl ReaderManager {
    /// Start the session worker.
    ///
    /// The worker runs until `cancel` is cancelled or every handle is
    /// dropped.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cancel = CancellationToken::new();
    /// let (manager, worker) =
    ///     ReaderManager::start(transports, driver, ManagerConfig::default(), cancel.clone())?;
    ///
    /// // Later, to stop the session:
    /// cancel.cancel();
    /// worker.await.unwrap();
    /// ```
    pub fn start(
        transports: Arc<dyn TransportsManager>,
        driver: Arc<dyn ReaderDriver>,
        config: ManagerConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;

        let session = ReaderSession::new(driver, config.unidentified_policy, config.event_capacity);
        let (commands, command_rx) = mpsc::channel(config.command_capacity);
        let manager = Self {
            commands,
            events: session.event_dispatcher(),
            active: session.watch_active_reader(),
            transports: Arc::clone(&transports),
        };

        let notifications = transports.subscribe();
        let handle = tokio::spawn(run_session(
            session,
            transports,
            notifications,
            command_rx,
            cancel,
        ));
        Ok((manager, handle))
    }

    /// Subscribe to reader and active reader events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The active reader, if any.
    pub fn active_reader(&self) -> Option<Arc<Reader>> {
        self.active.borrow().reader.clone()
    }

    /// State of the active reader selection.
    pub fn active_reader_state(&self) -> ReaderState {
        self.active.borrow().state
    }

    /// Watch the active reader selection.
    pub fn watch_active_reader(&self) -> watch::Receiver<ActiveReaderSnapshot> {
        self.active.clone()
    }

    /// Known readers.
    pub async fn readers(&self) -> Result<Vec<Arc<Reader>>> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(SessionCommand::Readers { reply }).await?;
        Ok(rx.await?)
    }

    /// Select a reader (or none) as the active reader.
    pub async fn set_active_reader(&self, reader: Option<Arc<Reader>>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::SetActiveReader { reader, reply })
            .await?;
        rx.await?
    }

    /// Disconnect every transport of a reader.
    pub async fn disconnect_reader(&self, reader: Arc<Reader>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::DisconnectReader { reader, reply })
            .await?;
        rx.await?
    }

    /// Queue a transport notification that did not come through the
    /// transports manager subscription.
    pub async fn notify_transport_changed(
        &self,
        transport: Arc<dyn Transport>,
        state: TransportState,
    ) -> Result<()> {
        self.commands
            .send(SessionCommand::TransportChanged { transport, state })
            .await?;
        Ok(())
    }

    /// Pair the reader whose Bluetooth address is printed in `barcode`.
    ///
    /// Returns the paired address, or `None` when the barcode holds no
    /// address.
    pub async fn pair_from_barcode(&self, barcode: &str) -> Result<Option<String>> {
        let Some(address) = bluetooth_address_from_barcode(barcode) else {
            debug!("Barcode {} holds no Bluetooth address", barcode);
            return Ok(None);
        };
        if !self.transports.can_pair() {
            return Err(Error::UnsupportedOperation("pairing"));
        }
        info!("Pairing reader at {}", address);
        self.transports.pair(&address).await?;
        Ok(Some(address))
    }

    /// Remove a pairing.
    pub async fn unpair(&self, address: &str) -> Result<()> {
        if !self.transports.can_pair() {
            return Err(Error::UnsupportedOperation("pairing"));
        }
        info!("Unpairing reader at {}", address);
        self.transports.unpair(address).await
    }
}

async fn run_session(
    mut session: ReaderSession,
    transports: Arc<dyn TransportsManager>,
    mut notifications: broadcast::Receiver<TransportChanged>,
    mut commands: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
) {
    let mut listening = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Reader session cancelled, shutting down");
                break;
            }
            notification = notifications.recv(), if listening => match notification {
                Ok(TransportChanged { transport, state }) => {
                    session.handle_transport_changed(transport, state).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Reader session missed {} transport notifications, resynchronising",
                        skipped
                    );
                    session.resync(transports.enumerate()).await;
                }
                Err(RecvError::Closed) => {
                    debug!("Transport notifications closed");
                    listening = false;
                }
            },
            command = commands.recv() => match command {
                Some(command) => session.handle_command(command).await,
                None => {
                    debug!("All reader manager handles dropped");
                    break;
                }
            },
        }
    }
}
