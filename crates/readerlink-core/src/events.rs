//! Session event system for reader and active reader notifications.
//!
//! The session worker is the only producer of [`SessionEvent`]s. Consumers
//! such as the transponder monitor, the inventory configurator and the tag
//! access operations subscribe and rebind when the active reader changes.
//!
//! Long-running operations narrate what they are doing on a separate
//! [`ProgressReporter`] stream of plain text lines.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use readerlink_types::ReaderState;

use crate::reader::Reader;

/// Events raised by the reader session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Clone)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A known reader changed state (including a newly identified reader).
    ReaderChanged {
        reader: Arc<Reader>,
        state: ReaderState,
    },
    /// The active reader selection changed state.
    ///
    /// During a teardown `reader` is the reader being released; during a
    /// bind it is the new reader.
    ActiveReaderChanged {
        reader: Arc<Reader>,
        state: ReaderState,
    },
}

impl SessionEvent {
    /// The reader the event refers to.
    pub fn reader(&self) -> &Arc<Reader> {
        match self {
            Self::ReaderChanged { reader, .. } | Self::ActiveReaderChanged { reader, .. } => reader,
        }
    }

    /// The state carried by the event.
    pub fn state(&self) -> ReaderState {
        match self {
            Self::ReaderChanged { state, .. } | Self::ActiveReaderChanged { state, .. } => *state,
        }
    }

    /// Whether this is an active reader transition.
    pub fn is_active_reader_change(&self) -> bool {
        matches!(self, Self::ActiveReaderChanged { .. })
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, reader, state) = match self {
            Self::ReaderChanged { reader, state } => ("ReaderChanged", reader, state),
            Self::ActiveReaderChanged { reader, state } => ("ActiveReaderChanged", reader, state),
        };
        f.debug_struct(kind)
            .field("reader", &reader.display_name())
            .field("state", state)
            .finish()
    }
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = event_channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Receiver for progress lines.
pub type ProgressReceiver = broadcast::Receiver<String>;

/// Broadcasts human-readable progress lines.
///
/// Lines are informational: they are emitted on success paths as well as
/// failures, and an empty line separates groups of related lines.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<String>,
}

impl ProgressReporter {
    /// Create a reporter buffering up to `capacity` lines per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to progress lines.
    pub fn subscribe(&self) -> ProgressReceiver {
        self.sender.subscribe()
    }

    /// Emit a line.
    pub fn report(&self, message: impl Into<String>) {
        let _ = self.sender.send(message.into());
    }

    /// Emit an empty separator line.
    pub fn separator(&self) {
        self.report(String::new());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain every line currently buffered in a progress receiver.
pub fn drain_progress(receiver: &mut ProgressReceiver) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(line) => lines.push(line),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    lines
}
