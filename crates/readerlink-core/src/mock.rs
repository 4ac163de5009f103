//! Mock transports, readers and operations for testing.
//!
//! This module simulates the external transport and command library so the
//! session manager, the inventory aggregator and the tag access operations
//! can be exercised without reader hardware.
//!
//! # Features
//!
//! - **Transports**: [`MockTransport`] raises state changes through a
//!   [`MockTransportsManager`] exactly as a real enumerator would
//! - **Identity**: [`MockReaderDriver`] answers identity queries per transport
//! - **Operations**: inventory, transponder access, barcode and battery
//!   capabilities with call recording and one-shot failure injection
//! - **Tag field**: [`SimulatedTag`]s in range of the access operation answer
//!   inventories, reads and writes

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use readerlink_types::tag::{EPC_WORD_OFFSET, MAX_EPC_WORDS, PC_WORD_OFFSET, pc_with_length};
use readerlink_types::{
    MemoryBank, TagAccess, TagFields, TagFilter, TagMemory, TransponderBatch, TransponderData,
    TransportKind, TransportState,
};

use crate::barcode::BarcodeScan;
use crate::error::{Error, Result};
use crate::reader::Capabilities;
use crate::traits::{
    BarcodeOperation, BatteryOperation, BatteryStatus, HostBarcodeSource, InventoryOperation,
    ReaderDriver, ReaderIdentity, ReaderOperation, TransponderAccessOperation, Transport,
    TransportChanged, TransportsManager,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// --- Transports ---

/// A simulated transport.
///
/// State changes made through [`Transport::connect`], [`Transport::disconnect`]
/// or the test controls are announced to the [`MockTransportsManager`] the
/// transport is attached to.
pub struct MockTransport {
    id: String,
    name: String,
    info: Option<String>,
    kind: TransportKind,
    state: Mutex<TransportState>,
    notifier: Mutex<Option<broadcast::Sender<TransportChanged>>>,
    me: Weak<MockTransport>,
    connect_should_fail: AtomicBool,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &*lock(&self.state))
            .finish()
    }
}

impl MockTransport {
    /// Create an available transport named after its identifier.
    pub fn new(id: &str, kind: TransportKind) -> Arc<Self> {
        Self::with_details(id, id, None, kind)
    }

    /// Create an available transport with display details.
    pub fn with_details(id: &str, name: &str, info: Option<&str>, kind: TransportKind) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: id.to_string(),
            name: name.to_string(),
            info: info.map(str::to_string),
            kind,
            state: Mutex::new(TransportState::Available),
            notifier: Mutex::new(None),
            me: me.clone(),
            connect_should_fail: AtomicBool::new(false),
            connect_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
        })
    }

    /// Set the state without raising a notification.
    pub fn set_state(&self, state: TransportState) {
        *lock(&self.state) = state;
    }

    /// Set the state and raise a notification.
    pub fn notify(&self, state: TransportState) {
        self.set_state(state);
        let sender = lock(&self.notifier).clone();
        if let (Some(sender), Some(me)) = (sender, self.me.upgrade()) {
            let transport: Arc<dyn Transport> = me;
            let _ = sender.send(TransportChanged { transport, state });
        }
    }

    /// Simulate the link dropping.
    pub fn lose(&self) {
        self.notify(TransportState::Lost);
    }

    /// Simulate a temporary interruption.
    pub fn interrupt(&self) {
        self.notify(TransportState::Interrupted);
    }

    /// Make the next connect requests fail.
    pub fn set_connect_should_fail(&self, fail: bool) {
        self.connect_should_fail.store(fail, Ordering::Relaxed);
    }

    /// Number of connect requests received.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Number of disconnect requests received.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::Relaxed)
    }

    fn attach(&self, sender: broadcast::Sender<TransportChanged>) {
        *lock(&self.notifier) = Some(sender);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn display_info(&self) -> Option<String> {
        self.info.clone()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    async fn connect(&self) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        if self.connect_should_fail.load(Ordering::Relaxed) {
            return Err(Error::device("connect", format!("{} refused the connection", self.id)));
        }
        self.notify(TransportState::Connecting);
        self.notify(TransportState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        self.notify(TransportState::Disconnecting);
        self.notify(TransportState::Disconnected);
        Ok(())
    }
}

/// A simulated transport enumerator.
pub struct MockTransportsManager {
    sender: broadcast::Sender<TransportChanged>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    paired: Mutex<Vec<String>>,
    can_pair: AtomicBool,
}

impl MockTransportsManager {
    /// Create an enumerator with no transports.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create an enumerator whose notification channel holds `capacity`
    /// pending changes per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            transports: Mutex::new(Vec::new()),
            paired: Mutex::new(Vec::new()),
            can_pair: AtomicBool::new(true),
        }
    }

    /// Enumerate a new transport.
    pub fn add(&self, id: &str, kind: TransportKind) -> Arc<MockTransport> {
        let transport = MockTransport::new(id, kind);
        self.attach(&transport);
        transport
    }

    /// Attach an existing transport so its state changes are announced.
    pub fn attach(&self, transport: &Arc<MockTransport>) {
        transport.attach(self.sender.clone());
        lock(&self.transports).push(Arc::clone(transport));
    }

    /// All enumerated transports.
    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        lock(&self.transports).clone()
    }

    /// Addresses paired so far.
    pub fn paired(&self) -> Vec<String> {
        lock(&self.paired).clone()
    }

    /// Enable or disable pairing support.
    pub fn set_can_pair(&self, can_pair: bool) {
        self.can_pair.store(can_pair, Ordering::Relaxed);
    }
}

impl Default for MockTransportsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportsManager for MockTransportsManager {
    fn subscribe(&self) -> broadcast::Receiver<TransportChanged> {
        self.sender.subscribe()
    }

    fn enumerate(&self) -> Vec<Arc<dyn Transport>> {
        lock(&self.transports)
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn Transport>)
            .collect()
    }

    fn can_pair(&self) -> bool {
        self.can_pair.load(Ordering::Relaxed)
    }

    async fn pair(&self, address: &str) -> Result<()> {
        if !self.can_pair() {
            return Err(Error::pairing(address, "pairing is not supported"));
        }
        lock(&self.paired).push(address.to_string());
        let transport = MockTransport::with_details(
            address,
            &format!("Reader {}", address),
            Some(address),
            TransportKind::Bluetooth,
        );
        self.attach(&transport);
        Ok(())
    }

    async fn unpair(&self, address: &str) -> Result<()> {
        let mut paired = lock(&self.paired);
        let before = paired.len();
        paired.retain(|a| a != address);
        if paired.len() == before {
            return Err(Error::pairing(address, "not paired"));
        }
        Ok(())
    }
}

// --- Identity ---

/// Answers identity queries from a table keyed by transport identifier.
///
/// Transports that are not in the table fail with
/// [`Error::IdentityUnresolved`].
#[derive(Default)]
pub struct MockReaderDriver {
    identities: Mutex<HashMap<String, ReaderIdentity>>,
    identify_count: AtomicU32,
    should_fail: AtomicBool,
}

impl MockReaderDriver {
    /// Create a driver that knows no readers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `reader` reachable over the transport with this identifier.
    pub fn register(&self, transport_id: &str, reader: &MockReader) {
        lock(&self.identities).insert(transport_id.to_string(), reader.identity());
    }

    /// Make identity queries fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Number of identity queries answered.
    pub fn identify_count(&self) -> u32 {
        self.identify_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReaderDriver for MockReaderDriver {
    async fn identify(&self, transport: &Arc<dyn Transport>) -> Result<ReaderIdentity> {
        self.identify_count.fetch_add(1, Ordering::Relaxed);
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::device("identify", "no response from reader"));
        }
        lock(&self.identities)
            .get(transport.id())
            .cloned()
            .ok_or_else(|| Error::IdentityUnresolved {
                transport_id: transport.id().to_string(),
            })
    }
}

// --- Operation lifecycle ---

/// A lifecycle step of a reader operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    Enable,
    Start,
    Stop,
    Disable,
}

impl MockStep {
    fn name(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Disable => "disable",
        }
    }
}

/// Call recording and failure injection shared by the mock operations.
#[derive(Debug)]
struct MockLifecycle {
    enabled: AtomicBool,
    calls: Mutex<Vec<MockStep>>,
    failure: Mutex<Option<(MockStep, String)>>,
    minimum_power: AtomicI32,
    maximum_power: AtomicI32,
}

impl MockLifecycle {
    fn new(minimum_power: i32, maximum_power: i32) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            minimum_power: AtomicI32::new(minimum_power),
            maximum_power: AtomicI32::new(maximum_power),
        }
    }

    fn step(&self, step: MockStep) -> Result<()> {
        lock(&self.calls).push(step);

        let mut failure = lock(&self.failure);
        if failure.as_ref().is_some_and(|(s, _)| *s == step) {
            if let Some((_, message)) = failure.take() {
                return Err(Error::device(step.name(), message));
            }
        }
        drop(failure);

        match step {
            MockStep::Enable => self.enabled.store(true, Ordering::Relaxed),
            MockStep::Disable => self.enabled.store(false, Ordering::Relaxed),
            MockStep::Start if !self.enabled.load(Ordering::Relaxed) => {
                return Err(Error::device("start", "operation is not enabled"));
            }
            _ => {}
        }
        Ok(())
    }

    fn fail_next(&self, step: MockStep, message: &str) {
        *lock(&self.failure) = Some((step, message.to_string()));
    }
}

macro_rules! mock_lifecycle {
    ($ty:ty) => {
        impl $ty {
            /// Whether the operation is enabled.
            pub fn is_enabled(&self) -> bool {
                self.lifecycle.enabled.load(Ordering::Relaxed)
            }

            /// Lifecycle calls received so far.
            pub fn calls(&self) -> Vec<MockStep> {
                lock(&self.lifecycle.calls).clone()
            }

            /// Forget recorded calls.
            pub fn clear_calls(&self) {
                lock(&self.lifecycle.calls).clear();
            }

            /// Fail the next call of `step` with a device error.
            pub fn fail_next(&self, step: MockStep, message: &str) {
                self.lifecycle.fail_next(step, message);
            }

            /// Change the reported power bounds.
            pub fn set_power_range(&self, minimum: i32, maximum: i32) {
                self.lifecycle.minimum_power.store(minimum, Ordering::Relaxed);
                self.lifecycle.maximum_power.store(maximum, Ordering::Relaxed);
            }
        }

        #[async_trait]
        impl ReaderOperation for $ty {
            async fn enable(&self) -> Result<()> {
                self.lifecycle.step(MockStep::Enable)
            }

            async fn start(&self) -> Result<()> {
                self.lifecycle.step(MockStep::Start)?;
                self.on_start()
            }

            async fn stop(&self) -> Result<()> {
                self.lifecycle.step(MockStep::Stop)
            }

            async fn disable(&self) -> Result<()> {
                self.lifecycle.step(MockStep::Disable)
            }

            fn minimum_output_power(&self) -> i32 {
                self.lifecycle.minimum_power.load(Ordering::Relaxed)
            }

            fn maximum_output_power(&self) -> i32 {
                self.lifecycle.maximum_power.load(Ordering::Relaxed)
            }
        }
    };
}

/// Default reader power bounds in dBm.
pub const MOCK_MINIMUM_POWER: i32 = 10;
pub const MOCK_MAXIMUM_POWER: i32 = 29;

// --- Inventory ---

/// A simulated inventory capability.
///
/// Batches passed to [`MockInventoryOperation::emit`] are delivered only
/// while the operation is enabled, like a trigger-driven reader.
#[derive(Debug)]
pub struct MockInventoryOperation {
    lifecycle: MockLifecycle,
    filter: Mutex<TagFilter>,
    sender: broadcast::Sender<TransponderBatch>,
    pending: Mutex<VecDeque<TransponderBatch>>,
}

impl MockInventoryOperation {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            lifecycle: MockLifecycle::new(MOCK_MINIMUM_POWER, MOCK_MAXIMUM_POWER),
            filter: Mutex::new(TagFilter::all()),
            sender,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Deliver a batch if the operation is enabled. Returns whether it was
    /// delivered.
    pub fn emit(&self, batch: TransponderBatch) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let _ = self.sender.send(batch);
        true
    }

    /// Queue a batch delivered by the next `start`.
    pub fn queue_pass(&self, batch: TransponderBatch) {
        lock(&self.pending).push_back(batch);
    }

    fn on_start(&self) -> Result<()> {
        let batches: Vec<_> = lock(&self.pending).drain(..).collect();
        for batch in batches {
            let _ = self.sender.send(batch);
        }
        Ok(())
    }
}

impl Default for MockInventoryOperation {
    fn default() -> Self {
        Self::new()
    }
}

mock_lifecycle!(MockInventoryOperation);

impl InventoryOperation for MockInventoryOperation {
    fn filter(&self) -> TagFilter {
        lock(&self.filter).clone()
    }

    fn set_filter(&self, filter: TagFilter) {
        *lock(&self.filter) = filter;
    }

    fn subscribe(&self) -> broadcast::Receiver<TransponderBatch> {
        self.sender.subscribe()
    }
}

// --- Transponder access ---

/// A tag in range of a simulated reader.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTag {
    /// EPC identifier as upper-case hex.
    pub epc: String,
    /// Protocol-control word.
    pub pc: u16,
    /// Signal strength the reader sees, in dBm.
    pub rssi: i32,
    /// TID bank content as hex.
    pub tid: String,
}

impl SimulatedTag {
    /// A tag with a PC word matching its identifier length.
    pub fn new(epc: &str, rssi: i32) -> Self {
        let words = (epc.len() / 4).min(MAX_EPC_WORDS);
        Self {
            epc: epc.to_uppercase(),
            pc: pc_with_length(0x3000, words).unwrap_or(0x3000),
            rssi,
            tid: "E2801105200074A5".to_string(),
        }
    }

    /// Replace the TID content.
    #[must_use]
    pub fn with_tid(mut self, tid: &str) -> Self {
        self.tid = tid.to_uppercase();
        self
    }

    fn bank_content(&self, bank: MemoryBank) -> String {
        match bank {
            MemoryBank::Epc => format!("0000{:04X}{}", self.pc, self.epc),
            MemoryBank::Tid => self.tid.clone(),
            MemoryBank::Reserved => "0".repeat(16),
            MemoryBank::User => "0".repeat(32),
        }
    }

    fn read(&self, bank: MemoryBank, word_address: u16, word_count: u16) -> String {
        let content = self.bank_content(bank);
        let start = (usize::from(word_address) * 4).min(content.len());
        let end = (start + usize::from(word_count) * 4).min(content.len());
        content[start..end].to_string()
    }

    fn write(&mut self, bank: MemoryBank, word_address: u16, data: &TagMemory) {
        if bank != MemoryBank::Epc {
            return;
        }
        let hex = data.as_hex().to_uppercase();
        if word_address == EPC_WORD_OFFSET {
            self.epc = hex;
        } else if word_address == PC_WORD_OFFSET && hex.len() >= 4 {
            if let Ok(pc) = u16::from_str_radix(&hex[..4], 16) {
                self.pc = pc;
                self.epc = hex[4..].to_string();
            }
        }
    }
}

/// Configuration captured when a transponder access run started.
#[derive(Debug, Clone, PartialEq)]
pub struct MockAccessRun {
    pub filter: TagFilter,
    pub access: Option<TagAccess>,
}

/// A simulated transponder access capability.
///
/// Each `start` answers with the next scripted result if one is queued,
/// otherwise with the responses of the [`SimulatedTag`]s in range.
#[derive(Debug)]
pub struct MockAccessOperation {
    lifecycle: MockLifecycle,
    config: Mutex<(TagFilter, Option<TagAccess>)>,
    runs: Mutex<Vec<MockAccessRun>>,
    scripted: Mutex<VecDeque<Vec<TransponderData>>>,
    last: Mutex<Vec<TransponderData>>,
    tags: Mutex<Vec<SimulatedTag>>,
    write_limit: Mutex<Option<u16>>,
    write_failure: Mutex<Option<String>>,
    sender: broadcast::Sender<TransponderData>,
}

impl MockAccessOperation {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            lifecycle: MockLifecycle::new(MOCK_MINIMUM_POWER, MOCK_MAXIMUM_POWER),
            config: Mutex::new((TagFilter::all(), None)),
            runs: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
            write_limit: Mutex::new(None),
            write_failure: Mutex::new(None),
            sender,
        }
    }

    /// Place tags in range of the reader.
    pub fn set_tags(&self, tags: Vec<SimulatedTag>) {
        *lock(&self.tags) = tags;
    }

    /// Tags currently in range, including any writes applied to them.
    pub fn tags(&self) -> Vec<SimulatedTag> {
        lock(&self.tags).clone()
    }

    /// Queue the exact result of the next run.
    pub fn push_result(&self, transponders: Vec<TransponderData>) {
        lock(&self.scripted).push_back(transponders);
    }

    /// Limit how many words a write reaches before the tag stops answering.
    pub fn set_write_limit(&self, words: Option<u16>) {
        *lock(&self.write_limit) = words;
    }

    /// Fail the next run that writes, after it has been recorded.
    pub fn fail_next_write(&self, message: &str) {
        *lock(&self.write_failure) = Some(message.to_string());
    }

    /// Configurations of every run so far.
    pub fn runs(&self) -> Vec<MockAccessRun> {
        lock(&self.runs).clone()
    }

    fn on_start(&self) -> Result<()> {
        let (filter, access) = lock(&self.config).clone();
        lock(&self.runs).push(MockAccessRun {
            filter: filter.clone(),
            access: access.clone(),
        });

        if matches!(access, Some(TagAccess::Write { .. })) {
            if let Some(message) = lock(&self.write_failure).take() {
                *lock(&self.last) = Vec::new();
                return Err(Error::device("start", message));
            }
        }

        let scripted = lock(&self.scripted).pop_front();
        let results = match scripted {
            Some(results) => results,
            None => self.answer_from_field(&filter, access.as_ref()),
        };

        *lock(&self.last) = results.clone();
        for transponder in results {
            let _ = self.sender.send(transponder);
        }
        Ok(())
    }

    fn answer_from_field(&self, filter: &TagFilter, access: Option<&TagAccess>) -> Vec<TransponderData> {
        let write_limit = *lock(&self.write_limit);
        let mut tags = lock(&self.tags);
        let mut results = Vec::new();

        for tag in tags.iter_mut() {
            if let Some(epc) = &filter.epc {
                if !tag.epc.eq_ignore_ascii_case(epc) {
                    continue;
                }
            }

            let mut data = TransponderData::new(tag.epc.clone()).at(OffsetDateTime::now_utc());
            if filter.report.contains(TagFields::RSSI) {
                data.rssi = Some(tag.rssi);
            }
            if filter.report.contains(TagFields::PC) {
                data.pc = Some(tag.pc);
            }

            match access {
                None => {}
                Some(TagAccess::Read {
                    bank,
                    word_address,
                    word_count,
                }) => {
                    data.read_data = Some(tag.read(*bank, *word_address, *word_count));
                }
                Some(TagAccess::Write {
                    bank,
                    word_address,
                    data: memory,
                }) => {
                    let requested = u16::try_from(memory.length_words()).unwrap_or(u16::MAX);
                    let written = write_limit.map_or(requested, |limit| limit.min(requested));
                    if written == requested {
                        tag.write(*bank, *word_address, memory);
                    }
                    data.words_written = Some(written);
                }
            }

            results.push(data);
            if filter.expect_one {
                break;
            }
        }
        results
    }
}

impl Default for MockAccessOperation {
    fn default() -> Self {
        Self::new()
    }
}

mock_lifecycle!(MockAccessOperation);

impl TransponderAccessOperation for MockAccessOperation {
    fn configure(&self, filter: TagFilter, access: Option<TagAccess>) {
        *lock(&self.config) = (filter, access);
    }

    fn transponders(&self) -> Vec<TransponderData> {
        lock(&self.last).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransponderData> {
        self.sender.subscribe()
    }
}

// --- Barcode and battery ---

/// A simulated reader-side barcode engine.
#[derive(Debug)]
pub struct MockBarcodeOperation {
    lifecycle: MockLifecycle,
    sender: broadcast::Sender<BarcodeScan>,
}

impl MockBarcodeOperation {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            lifecycle: MockLifecycle::new(MOCK_MINIMUM_POWER, MOCK_MAXIMUM_POWER),
            sender,
        }
    }

    /// Report a scan if the engine is enabled.
    pub fn emit(&self, barcode: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let _ = self.sender.send(BarcodeScan::now(barcode));
        true
    }

    fn on_start(&self) -> Result<()> {
        Ok(())
    }
}

impl Default for MockBarcodeOperation {
    fn default() -> Self {
        Self::new()
    }
}

mock_lifecycle!(MockBarcodeOperation);

impl BarcodeOperation for MockBarcodeOperation {
    fn subscribe(&self) -> broadcast::Receiver<BarcodeScan> {
        self.sender.subscribe()
    }
}

/// A simulated battery.
#[derive(Debug)]
pub struct MockBattery {
    level: AtomicU8,
    charging: AtomicBool,
}

impl MockBattery {
    pub fn new(level: u8) -> Self {
        Self {
            level: AtomicU8::new(level),
            charging: AtomicBool::new(false),
        }
    }

    pub fn set_level(&self, level: u8) {
        self.level.store(level.min(100), Ordering::Relaxed);
    }

    pub fn set_charging(&self, charging: bool) {
        self.charging.store(charging, Ordering::Relaxed);
    }
}

#[async_trait]
impl BatteryOperation for MockBattery {
    async fn battery_status(&self) -> Result<BatteryStatus> {
        Ok(BatteryStatus {
            level: self.level.load(Ordering::Relaxed),
            charging: self.charging.load(Ordering::Relaxed),
        })
    }
}

// --- Readers ---

/// A simulated reader: a serial number plus concrete mock capabilities.
#[derive(Debug, Clone)]
pub struct MockReader {
    pub serial_number: Option<String>,
    pub inventory: Option<Arc<MockInventoryOperation>>,
    pub access: Option<Arc<MockAccessOperation>>,
    pub barcode: Option<Arc<MockBarcodeOperation>>,
    pub battery: Option<Arc<MockBattery>>,
}

impl MockReader {
    /// The identity the driver reports for this reader.
    pub fn identity(&self) -> ReaderIdentity {
        let capabilities = Capabilities {
            inventory: self
                .inventory
                .clone()
                .map(|op| op as Arc<dyn InventoryOperation>),
            transponder_access: self
                .access
                .clone()
                .map(|op| op as Arc<dyn TransponderAccessOperation>),
            barcode: self
                .barcode
                .clone()
                .map(|op| op as Arc<dyn BarcodeOperation>),
            battery: self
                .battery
                .clone()
                .map(|op| op as Arc<dyn BatteryOperation>),
        };
        ReaderIdentity {
            serial_number: self.serial_number.clone(),
            capabilities,
        }
    }
}

/// Builder for [`MockReader`].
#[derive(Debug, Clone)]
pub struct MockReaderBuilder {
    serial_number: Option<String>,
    inventory: bool,
    access: bool,
    barcode: bool,
    battery: Option<u8>,
    minimum_power: i32,
    maximum_power: i32,
    tags: Vec<SimulatedTag>,
}

impl Default for MockReaderBuilder {
    fn default() -> Self {
        Self {
            serial_number: Some("000000-MOCK".to_string()),
            inventory: true,
            access: true,
            barcode: false,
            battery: Some(85),
            minimum_power: MOCK_MINIMUM_POWER,
            maximum_power: MOCK_MAXIMUM_POWER,
            tags: Vec::new(),
        }
    }
}

impl MockReaderBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the serial number.
    #[must_use]
    pub fn serial(mut self, serial: &str) -> Self {
        self.serial_number = Some(serial.to_string());
        self
    }

    /// Make the reader unidentifiable.
    #[must_use]
    pub fn unidentified(mut self) -> Self {
        self.serial_number = None;
        self
    }

    #[must_use]
    pub fn inventory(mut self, enabled: bool) -> Self {
        self.inventory = enabled;
        self
    }

    #[must_use]
    pub fn transponder_access(mut self, enabled: bool) -> Self {
        self.access = enabled;
        self
    }

    #[must_use]
    pub fn barcode(mut self, enabled: bool) -> Self {
        self.barcode = enabled;
        self
    }

    #[must_use]
    pub fn battery(mut self, level: Option<u8>) -> Self {
        self.battery = level;
        self
    }

    /// Set the power bounds reported by every capability.
    #[must_use]
    pub fn power_range(mut self, minimum: i32, maximum: i32) -> Self {
        self.minimum_power = minimum;
        self.maximum_power = maximum;
        self
    }

    /// Place tags in range of the access capability.
    #[must_use]
    pub fn tags(mut self, tags: Vec<SimulatedTag>) -> Self {
        self.tags = tags;
        self
    }

    /// Build the reader.
    #[must_use]
    pub fn build(self) -> MockReader {
        let inventory = self.inventory.then(|| {
            let op = MockInventoryOperation::new();
            op.set_power_range(self.minimum_power, self.maximum_power);
            Arc::new(op)
        });
        let access = self.access.then(|| {
            let op = MockAccessOperation::new();
            op.set_power_range(self.minimum_power, self.maximum_power);
            op.set_tags(self.tags.clone());
            Arc::new(op)
        });
        let barcode = self.barcode.then(|| Arc::new(MockBarcodeOperation::new()));
        let battery = self.battery.map(|level| Arc::new(MockBattery::new(level)));

        MockReader {
            serial_number: self.serial_number,
            inventory,
            access,
            barcode,
            battery,
        }
    }
}

// --- Host barcode ---

/// A simulated host barcode scanner.
///
/// [`MockHostBarcode::initiate_scan`] reports the configured next barcode
/// after the scan delay unless the scan is cancelled first.
pub struct MockHostBarcode {
    sender: broadcast::Sender<BarcodeScan>,
    enabled: AtomicBool,
    pending: Arc<AtomicBool>,
    next_barcode: Mutex<Option<String>>,
    scan_delay: Mutex<Duration>,
}

impl MockHostBarcode {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            enabled: AtomicBool::new(false),
            pending: Arc::new(AtomicBool::new(false)),
            next_barcode: Mutex::new(None),
            scan_delay: Mutex::new(Duration::from_millis(750)),
        }
    }

    /// Barcode reported by the next scan.
    pub fn set_next_barcode(&self, barcode: Option<&str>) {
        *lock(&self.next_barcode) = barcode.map(str::to_string);
    }

    /// Delay between initiating a scan and reporting it.
    pub fn set_scan_delay(&self, delay: Duration) {
        *lock(&self.scan_delay) = delay;
    }

    /// Whether a scan is in flight.
    pub fn is_scan_pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed)
    }

    /// Start a scan. Returns `false` when scanning is disabled, a scan is
    /// already pending or there is no next barcode.
    pub fn initiate_scan(&self) -> bool {
        if !self.enabled.load(Ordering::Relaxed) || self.is_scan_pending() {
            return false;
        }
        let Some(barcode) = lock(&self.next_barcode).clone().filter(|b| !b.is_empty()) else {
            return false;
        };

        self.pending.store(true, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let sender = self.sender.clone();
        let delay = *lock(&self.scan_delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if pending.swap(false, Ordering::Relaxed) {
                let _ = sender.send(BarcodeScan::now(&barcode));
            }
        });
        true
    }

    /// Cancel a pending scan. Returns whether one was pending.
    pub fn cancel_scan(&self) -> bool {
        self.pending.swap(false, Ordering::Relaxed)
    }
}

impl Default for MockHostBarcode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBarcodeSource for MockHostBarcode {
    fn is_available(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn enable(&self) -> Result<()> {
        self.enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.cancel_scan();
        self.enabled.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BarcodeScan> {
        self.sender.subscribe()
    }
}
