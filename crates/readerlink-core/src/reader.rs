//! Logical reader identities.
//!
//! A [`Reader`] is created the moment an unidentified transport connects and
//! is populated by an identity query over that transport. Over its lifetime
//! it can be reachable over several transports (for example USB and
//! Bluetooth at once); the preferred transport is re-resolved whenever the
//! set changes.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use readerlink_types::TransportState;

use crate::traits::{
    BarcodeOperation, BatteryOperation, InventoryOperation, ReaderIdentity,
    TransponderAccessOperation, Transport,
};

/// Unique identifier of a [`Reader`] for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(Uuid);

impl ReaderId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed capability objects offered by a reader.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub inventory: Option<Arc<dyn InventoryOperation>>,
    pub transponder_access: Option<Arc<dyn TransponderAccessOperation>>,
    pub barcode: Option<Arc<dyn BarcodeOperation>>,
    pub battery: Option<Arc<dyn BatteryOperation>>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("inventory", &self.inventory.is_some())
            .field("transponder_access", &self.transponder_access.is_some())
            .field("barcode", &self.barcode.is_some())
            .field("battery", &self.battery.is_some())
            .finish()
    }
}

impl Capabilities {
    /// Whether both sets hold the same capability objects.
    pub fn same_as(&self, other: &Self) -> bool {
        same_object(&self.inventory, &other.inventory)
            && same_object(&self.transponder_access, &other.transponder_access)
            && same_object(&self.barcode, &other.barcode)
            && same_object(&self.battery, &other.battery)
    }
}

fn same_object<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
        (None, None) => true,
        _ => false,
    }
}

#[derive(Default)]
struct ReaderInner {
    serial_number: Option<String>,
    transports: Vec<Arc<dyn Transport>>,
    preferred: Option<Arc<dyn Transport>>,
    capabilities: Capabilities,
}

/// A logical reader.
///
/// Shared as `Arc<Reader>`. Only the session worker mutates it.
pub struct Reader {
    id: ReaderId,
    inner: RwLock<ReaderInner>,
}

impl Reader {
    /// Create an unidentified reader with no transports.
    pub fn new() -> Self {
        Self {
            id: ReaderId::new(),
            inner: RwLock::new(ReaderInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ReaderInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ReaderInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process-unique identifier.
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Serial number, once identified.
    pub fn serial_number(&self) -> Option<String> {
        self.read().serial_number.clone()
    }

    /// Whether the reader has been identified.
    pub fn is_identified(&self) -> bool {
        self.read().serial_number.is_some()
    }

    /// Name for logs and listings.
    pub fn display_name(&self) -> String {
        self.read()
            .serial_number
            .clone()
            .unwrap_or_else(|| "Unidentified reader".to_string())
    }

    /// Transports currently bound to the reader.
    pub fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.read().transports.clone()
    }

    /// Whether a transport with this identifier is bound.
    pub fn has_transport(&self, transport_id: &str) -> bool {
        self.read().transports.iter().any(|t| t.id() == transport_id)
    }

    /// The transport used to command the reader.
    pub fn preferred_transport(&self) -> Option<Arc<dyn Transport>> {
        self.read().preferred.clone()
    }

    /// Whether any bound transport is connected.
    pub fn is_connected(&self) -> bool {
        self.read()
            .transports
            .iter()
            .any(|t| t.state() == TransportState::Connected)
    }

    /// Snapshot of the reader's capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.read().capabilities.clone()
    }

    pub fn inventory(&self) -> Option<Arc<dyn InventoryOperation>> {
        self.read().capabilities.inventory.clone()
    }

    pub fn transponder_access(&self) -> Option<Arc<dyn TransponderAccessOperation>> {
        self.read().capabilities.transponder_access.clone()
    }

    pub fn barcode(&self) -> Option<Arc<dyn BarcodeOperation>> {
        self.read().capabilities.barcode.clone()
    }

    pub fn battery(&self) -> Option<Arc<dyn BatteryOperation>> {
        self.read().capabilities.battery.clone()
    }

    pub(crate) fn add_transport(&self, transport: Arc<dyn Transport>) {
        let mut inner = self.write();
        if !inner.transports.iter().any(|t| t.id() == transport.id()) {
            inner.transports.push(transport);
        }
    }

    pub(crate) fn remove_transport(&self, transport_id: &str) -> Option<Arc<dyn Transport>> {
        let mut inner = self.write();
        let index = inner.transports.iter().position(|t| t.id() == transport_id)?;
        let removed = inner.transports.remove(index);
        if inner
            .preferred
            .as_ref()
            .is_some_and(|p| p.id() == transport_id)
        {
            inner.preferred = None;
        }
        Some(removed)
    }

    /// Apply the result of an identity query.
    ///
    /// An unresolved serial number never overwrites a known one. Returns
    /// whether the capability objects were replaced.
    pub(crate) fn apply_identity(&self, identity: ReaderIdentity) -> bool {
        let mut inner = self.write();
        if identity.serial_number.is_some() {
            inner.serial_number = identity.serial_number;
        }
        let changed = !inner.capabilities.same_as(&identity.capabilities);
        inner.capabilities = identity.capabilities;
        changed
    }

    /// Pick the first connected transport in preference order.
    pub(crate) fn resolve_preferred_transport(&self) -> Option<Arc<dyn Transport>> {
        let mut inner = self.write();
        let preferred = inner
            .transports
            .iter()
            .filter(|t| t.state() == TransportState::Connected)
            .min_by_key(|t| t.kind())
            .cloned();
        inner.preferred = preferred.clone();
        preferred
    }

    /// Drop every binding so the reader holds no transport or capability.
    pub(crate) fn dispose(&self) {
        let mut inner = self.write();
        inner.transports.clear();
        inner.preferred = None;
        inner.capabilities = Capabilities::default();
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Reader")
            .field("id", &self.id)
            .field("serial_number", &inner.serial_number)
            .field(
                "transports",
                &inner.transports.iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .field("capabilities", &inner.capabilities)
            .finish()
    }
}

impl fmt::Display for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Whether two optional reader references point at the same reader.
pub(crate) fn same_reader(a: Option<&Arc<Reader>>, b: Option<&Arc<Reader>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.id() == b.id(),
        (None, None) => true,
        _ => false,
    }
}
