//! Simulated session commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rand::Rng;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use readerlink_core::mock::{
    MockReader, MockReaderBuilder, MockReaderDriver, MockTransport, MockTransportsManager,
    SimulatedTag,
};
use readerlink_core::{
    IdentifiedItem, InventoryConfigurator, InventoryOperation, InventoryStatistics,
    ProgressReporter, ProximityEpcChanger, Reader, ReaderManager, SessionEvent, SignalNormalizer,
    TransponderInventory, TransponderMonitor, Transport,
};
use readerlink_types::{
    ReaderState, TagFields, TagFilter, TagMemory, TransponderBatch, TransponderData, TransportKind,
};

use crate::cli::OutputFormat;
use crate::config::Config;

const SIMULATED_SERIAL: &str = "SIM-1128-0001";
const USB_LINK: &str = "usb-0";
const BLUETOOTH_LINK: &str = "bt-0";

/// PC word of a six-word simulated EPC.
const SIMULATED_PC: u16 = 0x3000;

/// How long to wait for the simulated hardware to react.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// A simulated reader wired into a running session.
struct Simulation {
    manager: ReaderManager,
    links: Vec<Arc<MockTransport>>,
    worker: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl Simulation {
    /// Start a session that knows `mock` on every link in `links`.
    fn start(config: &Config, mock: &MockReader, links: &[(&str, TransportKind)]) -> Result<Self> {
        let driver = MockReaderDriver::new();
        let transports = Arc::new(MockTransportsManager::new());
        let links = links
            .iter()
            .map(|(id, kind)| {
                driver.register(id, mock);
                transports.add(id, *kind)
            })
            .collect();

        let cancel = CancellationToken::new();
        let (manager, worker) = ReaderManager::start(
            transports,
            Arc::new(driver),
            config.session.clone(),
            cancel.clone(),
        )
        .context("Failed to start reader session")?;

        Ok(Self {
            manager,
            links,
            worker,
            cancel,
        })
    }

    async fn connect_all(&self) -> Result<()> {
        for link in &self.links {
            link.connect()
                .await
                .with_context(|| format!("Failed to connect {}", link.id()))?;
        }
        Ok(())
    }

    /// Wait until a reader is fully bound as the active reader.
    async fn active_reader(&self) -> Result<Arc<Reader>> {
        let mut watch = self.manager.watch_active_reader();
        let snapshot = timeout(
            SETTLE_TIMEOUT,
            watch.wait_for(|s| s.reader.is_some() && s.state == ReaderState::Connected),
        )
        .await
        .context("Timed out waiting for an active reader")?
        .context("Reader session stopped")?;
        snapshot.reader.clone().context("Active reader vanished")
    }

    async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.worker.await.context("Reader session worker panicked")
    }
}

fn simulated_epc(index: u32) -> String {
    format!("E2000017{:016X}", index)
}

/// Build the batches of one inventory pass over `population` tags.
///
/// Each tag answers with 80% probability; the answers are split over two
/// batches, the second closing the pass.
fn simulate_pass(population: u32, filter: &TagFilter) -> Vec<TransponderBatch> {
    let mut rng = rand::rng();
    let mut seen = Vec::new();
    for index in 0..population {
        if !rng.random_bool(0.8) {
            continue;
        }
        let mut data = TransponderData::new(simulated_epc(index)).at(time::OffsetDateTime::now_utc());
        if filter.report.contains(TagFields::RSSI) {
            data = data.with_rssi(rng.random_range(-75..=-35));
        }
        if filter.report.contains(TagFields::PC) {
            data = data.with_pc(SIMULATED_PC);
        }
        if filter.report.contains(TagFields::CHANNEL) || filter.report.contains(TagFields::PHASE) {
            data = data.with_channel(rng.random_range(865_700..=867_500), rng.random_range(0..=4095));
        }
        seen.push(data);
    }

    let second = seen.split_off(seen.len() / 2);
    vec![TransponderBatch::new(seen, false), TransponderBatch::new(second, true)]
}

fn describe_event(event: &SessionEvent) -> String {
    let kind = if event.is_active_reader_change() {
        "active reader"
    } else {
        "reader"
    };
    format!("{} {} is {}", kind, event.reader(), event.state())
}

#[derive(Serialize)]
struct ItemReport {
    identifier: String,
    seen_count: u32,
    signal: Option<f64>,
    first_seen: Option<String>,
    last_seen: Option<String>,
}

impl From<&IdentifiedItem> for ItemReport {
    fn from(item: &IdentifiedItem) -> Self {
        let stamp = |t: Option<time::OffsetDateTime>| t.and_then(|t| t.format(&Rfc3339).ok());
        Self {
            identifier: item.identifier().to_string(),
            seen_count: item.seen_count(),
            signal: item.has_signal().then(|| item.normalized_signal()),
            first_seen: stamp(item.first_seen()),
            last_seen: stamp(item.last_seen()),
        }
    }
}

#[derive(Serialize)]
struct InventoryReport<'a> {
    reader: String,
    transports: Vec<String>,
    preferred_transport: Option<String>,
    items: Vec<ItemReport>,
    statistics: &'a InventoryStatistics,
}

fn format_inventory_text(report: &InventoryReport<'_>, items: &[IdentifiedItem]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Reader {} over {} (preferred: {})\n\n",
        report.reader,
        report.transports.join(", "),
        report.preferred_transport.as_deref().unwrap_or("none"),
    ));
    out.push_str("Items:\n");
    for item in items {
        out.push_str(&format!("  {}\n", item));
    }
    let stats = report.statistics;
    out.push_str(&format!(
        "\nMode:         {}\nPasses:       {}\nLast pass:    {} seen, {} unique\nTotal:        {} seen, {} unique\n",
        stats.inventory_mode,
        stats.number_of_scans,
        stats.last_scan_seen_count,
        stats.last_scan_unique_count,
        stats.total_seen_count,
        stats.total_unique_count,
    ));
    out
}

/// Connect one reader over two links, run inventory passes and print what
/// was collected.
pub async fn cmd_simulate_inventory(
    config: &Config,
    passes: u32,
    population: u32,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let mock = MockReaderBuilder::new().serial(SIMULATED_SERIAL).build();
    let inventory_op = mock
        .inventory
        .clone()
        .context("Simulated reader has no inventory capability")?;

    // Bluetooth first so the USB link merges into the same reader.
    let simulation = Simulation::start(
        config,
        &mock,
        &[
            (BLUETOOTH_LINK, TransportKind::Bluetooth),
            (USB_LINK, TransportKind::Usb),
        ],
    )?;

    let monitor = Arc::new(TransponderMonitor::default());
    let listener = monitor.spawn_session_listener(simulation.manager.subscribe(), simulation.cancel.clone());
    let mut batches = monitor.subscribe();
    let mut events = simulation.manager.subscribe();
    let mut inventory = TransponderInventory::with_normalizer(
        Arc::clone(&monitor),
        Box::new(SignalNormalizer::with_range(config.signal)),
    );
    inventory.set_inventory_mode(format!("simulated, {} passes", passes));

    simulation.connect_all().await?;
    let reader = simulation.active_reader().await?;
    // Queued behind the link notifications, so the merge has happened.
    let readers = simulation.manager.readers().await?;
    debug!("Session knows {} readers", readers.len());

    let mut configurator = InventoryConfigurator::default();
    configurator.rebind(Some(&reader));
    configurator.configuration_mut().apply_settings(&config.inventory);
    if !configurator.configure() {
        bail!("Active reader cannot be configured for inventory");
    }

    timeout(SETTLE_TIMEOUT, async {
        while !inventory_op.is_enabled() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("Timed out waiting for inventory to start")?;

    if !quiet && format == OutputFormat::Text {
        while let Ok(event) = events.try_recv() {
            println!("{}", describe_event(&event));
        }
        println!();
    }

    let filter = inventory_op.filter();
    for pass in 1..=passes {
        for batch in simulate_pass(population, &filter) {
            if !inventory_op.emit(batch) {
                warn!("Inventory stopped during pass {}", pass);
                break;
            }
            let batch = timeout(SETTLE_TIMEOUT, batches.recv())
                .await
                .context("Timed out waiting for observations")?
                .context("Observation stream closed")?;
            inventory.ingest(&batch);
        }
        info!("Pass {} complete, {} unique tags", pass, inventory.items().len());
    }

    let report = InventoryReport {
        reader: reader.display_name(),
        transports: reader.transports().iter().map(|t| t.id().to_string()).collect(),
        preferred_transport: reader.preferred_transport().map(|t| t.id().to_string()),
        items: inventory.items().iter().map(ItemReport::from).collect(),
        statistics: inventory.statistics(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", format_inventory_text(&report, inventory.items())),
    }

    simulation.shutdown().await?;
    listener.await.context("Transponder monitor panicked")?;
    Ok(())
}

/// Rewrite the EPC of a single simulated tag, narrating each step.
pub async fn cmd_simulate_change_epc(
    config: &Config,
    epc: &str,
    current: &str,
    rssi: i32,
    quiet: bool,
) -> Result<()> {
    TagMemory::parse(current).with_context(|| format!("Invalid current EPC '{}'", current))?;

    let mock = MockReaderBuilder::new()
        .serial(SIMULATED_SERIAL)
        .tags(vec![SimulatedTag::new(current, rssi)])
        .build();
    let access = mock
        .access
        .clone()
        .context("Simulated reader has no transponder access capability")?;

    let simulation = Simulation::start(config, &mock, &[(USB_LINK, TransportKind::Usb)])?;
    simulation.connect_all().await?;
    simulation.active_reader().await?;

    let progress = ProgressReporter::default();
    let mut lines = progress.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match lines.recv().await {
                Ok(line) if !quiet => println!("{}", line),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut changer = ProximityEpcChanger::new(
        simulation.manager.watch_active_reader(),
        config.epc_changer,
        progress,
    );
    let outcome = changer.change_epc(epc).await;
    drop(changer);
    printer.await.context("Progress printer panicked")?;
    simulation.shutdown().await?;

    let outcome = outcome.context("EPC change could not run")?;
    println!("{}", outcome);
    if let Some(tag) = access.tags().first() {
        println!("Tag EPC is now {}", tag.epc);
    }
    if !outcome.is_success() {
        bail!("EPC change failed: {}", outcome);
    }
    Ok(())
}
