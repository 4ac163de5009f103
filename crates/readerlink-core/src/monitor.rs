//! Transponder monitoring bound to the active reader.
//!
//! [`TransponderMonitor`] follows the active reader's inventory capability
//! and republishes its observation batches on a stable channel, so
//! consumers keep one subscription across reader changes. It owns the
//! authoritative enabled flag for inventory gating.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use readerlink_types::{ReaderState, TransponderBatch};

use crate::error::Result;
use crate::events::{EventReceiver, SessionEvent};
use crate::traits::InventoryOperation;

struct MonitorBinding {
    operation: Arc<dyn InventoryOperation>,
    forwarder: CancellationToken,
}

impl Drop for MonitorBinding {
    fn drop(&mut self) {
        self.forwarder.cancel();
    }
}

fn same_operation(a: &Arc<dyn InventoryOperation>, b: &Arc<dyn InventoryOperation>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Republishes observation batches from the bound inventory operation.
pub struct TransponderMonitor {
    enabled: AtomicBool,
    sender: broadcast::Sender<TransponderBatch>,
    binding: Mutex<Option<MonitorBinding>>,
}

impl TransponderMonitor {
    /// Create an enabled monitor with no operation bound.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            enabled: AtomicBool::new(true),
            sender,
            binding: Mutex::new(None),
        }
    }

    /// Subscribe to observation batches.
    pub fn subscribe(&self) -> broadcast::Receiver<TransponderBatch> {
        self.sender.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Whether an inventory operation is bound.
    pub async fn is_bound(&self) -> bool {
        self.binding.lock().await.is_some()
    }

    /// Enable or disable monitoring, and the bound operation with it.
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.store(enabled, Ordering::Relaxed);
        let binding = self.binding.lock().await;
        if let Some(binding) = binding.as_ref() {
            if enabled {
                binding.operation.enable().await?;
            } else {
                binding.operation.disable().await?;
            }
        }
        Ok(())
    }

    /// Bind to an inventory operation, or unbind with `None`.
    ///
    /// The previous operation is disabled and no longer forwarded. The new
    /// one is forwarded and enabled if monitoring is enabled.
    pub async fn bind(&self, operation: Option<Arc<dyn InventoryOperation>>) -> Result<()> {
        let mut binding = self.binding.lock().await;

        let unchanged = match (binding.as_ref(), operation.as_ref()) {
            (Some(current), Some(new)) => same_operation(&current.operation, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        if let Some(old) = binding.take() {
            debug!("Releasing inventory operation");
            if let Err(e) = old.operation.disable().await {
                warn!("Failed to disable previous inventory operation: {}", e);
            }
        }

        let Some(operation) = operation else {
            return Ok(());
        };

        let forwarder = CancellationToken::new();
        tokio::spawn(forward_batches(
            operation.subscribe(),
            self.sender.clone(),
            forwarder.clone(),
        ));
        *binding = Some(MonitorBinding {
            operation: Arc::clone(&operation),
            forwarder,
        });
        info!("Monitoring inventory operation of the active reader");

        if self.is_enabled() {
            operation.enable().await?;
        }
        Ok(())
    }

    /// Follow an active reader transition.
    pub async fn handle_session_event(&self, event: &SessionEvent) {
        let SessionEvent::ActiveReaderChanged { reader, state } = event else {
            return;
        };
        let result = match state {
            ReaderState::Disconnecting => self.bind(None).await,
            ReaderState::Connected => self.bind(reader.inventory()).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Failed to rebind transponder monitor to {}: {}", reader, e);
        }
    }

    /// Follow active reader transitions until cancelled.
    pub fn spawn_session_listener(
        self: &Arc<Self>,
        mut events: EventReceiver,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => monitor.handle_session_event(&event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Transponder monitor missed {} session events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            // Leave the last reader's operation disabled.
            if let Err(e) = monitor.bind(None).await {
                warn!("Failed to release inventory operation: {}", e);
            }
        })
    }
}

impl Default for TransponderMonitor {
    fn default() -> Self {
        Self::new(64)
    }
}

async fn forward_batches(
    mut source: broadcast::Receiver<TransponderBatch>,
    sink: broadcast::Sender<TransponderBatch>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = source.recv() => match batch {
                Ok(batch) => {
                    let _ = sink.send(batch);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} observation batches", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use readerlink_types::TransponderData;

    use crate::mock::{MockInventoryOperation, MockStep};
    use crate::reader::Reader;
    use crate::traits::ReaderIdentity;

    fn batch(epc: &str) -> TransponderBatch {
        TransponderBatch::new(vec![TransponderData::new(epc)], true)
    }

    async fn recv(rx: &mut broadcast::Receiver<TransponderBatch>) -> TransponderBatch {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_enables_and_forwards() {
        let monitor = TransponderMonitor::default();
        let mut rx = monitor.subscribe();
        let op = Arc::new(MockInventoryOperation::new());

        monitor.bind(Some(op.clone())).await.unwrap();
        assert!(op.is_enabled());
        assert!(monitor.is_bound().await);

        assert!(op.emit(batch("3008")));
        assert_eq!(recv(&mut rx).await.transponders[0].epc, "3008");
    }

    #[tokio::test]
    async fn test_bind_while_disabled_leaves_operation_off() {
        let monitor = TransponderMonitor::default();
        monitor.set_enabled(false).await.unwrap();
        let op = Arc::new(MockInventoryOperation::new());

        monitor.bind(Some(op.clone())).await.unwrap();
        assert!(!op.is_enabled());

        monitor.set_enabled(true).await.unwrap();
        assert!(op.is_enabled());
        monitor.set_enabled(false).await.unwrap();
        assert!(!op.is_enabled());
    }

    #[tokio::test]
    async fn test_rebind_releases_previous_operation() {
        let monitor = TransponderMonitor::default();
        let mut rx = monitor.subscribe();
        let first = Arc::new(MockInventoryOperation::new());
        let second = Arc::new(MockInventoryOperation::new());

        monitor.bind(Some(first.clone())).await.unwrap();
        monitor.bind(Some(second.clone())).await.unwrap();

        assert!(!first.is_enabled());
        assert_eq!(first.calls(), vec![MockStep::Enable, MockStep::Disable]);
        assert!(second.is_enabled());

        second.emit(batch("B"));
        assert_eq!(recv(&mut rx).await.transponders[0].epc, "B");
    }

    #[tokio::test]
    async fn test_binding_same_operation_is_noop() {
        let monitor = TransponderMonitor::default();
        let op = Arc::new(MockInventoryOperation::new());
        monitor.bind(Some(op.clone())).await.unwrap();
        monitor.bind(Some(op.clone())).await.unwrap();
        assert_eq!(op.calls(), vec![MockStep::Enable]);
    }

    #[tokio::test]
    async fn test_session_events_drive_binding() {
        let monitor = TransponderMonitor::default();
        let op = Arc::new(MockInventoryOperation::new());
        let reader = Arc::new(Reader::new());
        reader.apply_identity(ReaderIdentity::new(
            "A1",
            crate::reader::Capabilities {
                inventory: Some(op.clone()),
                ..Default::default()
            },
        ));

        monitor
            .handle_session_event(&SessionEvent::ActiveReaderChanged {
                reader: reader.clone(),
                state: ReaderState::Connected,
            })
            .await;
        assert!(op.is_enabled());

        monitor
            .handle_session_event(&SessionEvent::ActiveReaderChanged {
                reader,
                state: ReaderState::Disconnecting,
            })
            .await;
        assert!(!op.is_enabled());
        assert!(!monitor.is_bound().await);
    }

    #[tokio::test]
    async fn test_enable_failure_is_reported() {
        let monitor = TransponderMonitor::default();
        let op = Arc::new(MockInventoryOperation::new());
        op.fail_next(MockStep::Enable, "radio busy");

        assert!(monitor.bind(Some(op.clone())).await.is_err());
        // Still bound, so a later enable retries.
        monitor.set_enabled(true).await.unwrap();
        assert!(op.is_enabled());
    }
}
