//! Reading and writing tag memory through the active reader.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use readerlink_types::{
    MemoryBank, ReaderState, TagAccess, TagFields, TagFilter, TagMemory, TransponderData,
};

use crate::configuration::{DEFAULT_MAXIMUM_OUTPUT_POWER, DEFAULT_MINIMUM_OUTPUT_POWER};
use crate::error::{Error, Result};
use crate::events::ProgressReporter;
use crate::session::ActiveReaderSnapshot;
use crate::traits::{ReaderOperation, TransponderAccessOperation};

/// Run one enable, start, stop, disable cycle.
///
/// Disable is issued even when an earlier step fails. The first error is
/// returned.
pub(crate) async fn run_operation<O: ReaderOperation + ?Sized>(operation: &O) -> Result<()> {
    let mut result = operation.enable().await;
    if result.is_ok() {
        result = operation.start().await;
        if result.is_ok() {
            result = operation.stop().await;
        }
    }
    let disabled = operation.disable().await;
    result.and(disabled)
}

/// Collect every response buffered on a per-tag result subscription.
pub(crate) fn collect_responses(
    receiver: &mut broadcast::Receiver<TransponderData>,
) -> Vec<TransponderData> {
    let mut responses = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(transponder) => responses.push(transponder),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Missed {} transponder responses", skipped);
            }
            Err(_) => break,
        }
    }
    responses
}

/// The transponder access capability of the active reader.
pub(crate) fn active_access_operation(
    active: &watch::Receiver<ActiveReaderSnapshot>,
) -> Result<Arc<dyn TransponderAccessOperation>> {
    let snapshot = active.borrow();
    let reader = snapshot.reader.as_ref().ok_or(Error::NoActiveReader)?;
    if snapshot.state != ReaderState::Connected {
        return Err(Error::NotConnected);
    }
    reader
        .transponder_access()
        .ok_or(Error::UnsupportedOperation("transponder access"))
}

/// Generic tag memory reads and writes against the active reader.
pub struct TagReaderWriter {
    active: watch::Receiver<ActiveReaderSnapshot>,
    progress: ProgressReporter,
    minimum_output_power: i32,
    maximum_output_power: i32,
}

impl TagReaderWriter {
    pub fn new(active: watch::Receiver<ActiveReaderSnapshot>, progress: ProgressReporter) -> Self {
        Self {
            active,
            progress,
            minimum_output_power: DEFAULT_MINIMUM_OUTPUT_POWER,
            maximum_output_power: DEFAULT_MAXIMUM_OUTPUT_POWER,
        }
    }

    /// The progress stream responses are narrated on.
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Lowest output power of the last reader used, in dBm.
    pub fn minimum_output_power(&self) -> i32 {
        self.minimum_output_power
    }

    /// Highest output power of the last reader used, in dBm.
    pub fn maximum_output_power(&self) -> i32 {
        self.maximum_output_power
    }

    /// Read `word_count` words from `bank`.
    ///
    /// Returns the number of transponders that responded.
    pub async fn read_tags(
        &mut self,
        epc: Option<&str>,
        bank: MemoryBank,
        word_address: u16,
        word_count: u16,
        output_power: Option<i32>,
    ) -> Result<usize> {
        let filter = self.filter(epc, output_power)?;
        info!("Reading {} words from {:?} bank", word_count, bank);
        self.run(filter, TagAccess::read(bank, word_address, word_count))
            .await
    }

    /// Write hex `data` to `bank` of a single tag.
    ///
    /// Returns the number of transponders that responded.
    pub async fn write_tags(
        &mut self,
        epc: Option<&str>,
        bank: MemoryBank,
        word_address: u16,
        data: &str,
        output_power: Option<i32>,
    ) -> Result<usize> {
        let memory = TagMemory::parse(data)?;
        let filter = self.filter(epc, output_power)?.expect_one();
        info!("Writing {} words to {:?} bank", memory.length_words(), bank);
        self.run(filter, TagAccess::write(bank, word_address, memory))
            .await
    }

    fn filter(&mut self, epc: Option<&str>, output_power: Option<i32>) -> Result<TagFilter> {
        let operation = active_access_operation(&self.active)?;
        self.minimum_output_power = operation.minimum_output_power();
        self.maximum_output_power = operation.maximum_output_power();

        let mut filter = match epc {
            Some(epc) => TagFilter::for_epc(epc),
            None => TagFilter::all(),
        }
        .report(TagFields::DEFAULT);
        if let Some(power) = output_power {
            filter = filter.at_power(power.clamp(self.minimum_output_power, self.maximum_output_power));
        }
        Ok(filter)
    }

    async fn run(&self, filter: TagFilter, access: TagAccess) -> Result<usize> {
        let operation = active_access_operation(&self.active)?;
        operation.configure(filter, Some(access));

        let mut responses = operation.subscribe();
        let result = run_operation(operation.as_ref()).await;
        let transponders = collect_responses(&mut responses);
        drop(responses);

        for transponder in &transponders {
            self.narrate(transponder);
        }
        debug!("{} transponders responded", transponders.len());

        result.map(|()| transponders.len())
    }

    fn narrate(&self, transponder: &TransponderData) {
        self.progress.report(format!("EPC: {}", transponder.epc));
        if let Some(data) = &transponder.read_data {
            self.progress.report(format!("Data: {}", data));
        }
        if let Some(words) = transponder.words_written {
            self.progress.report(format!("Written: {} words", words));
        }
        if let Some(error) = &transponder.backscatter_error {
            self.progress.report(format!("TAG ERROR: {}", error));
        }
        if let Some(error) = &transponder.access_error {
            self.progress.report(format!("READER ERROR: {}", error));
        }
        self.progress.separator();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain_progress;
    use crate::mock::{MockAccessOperation, MockReaderBuilder, MockStep, SimulatedTag};
    use crate::reader::Reader;

    fn writer_for(builder: MockReaderBuilder) -> (TagReaderWriter, Arc<MockAccessOperation>) {
        let mock = builder.build();
        let access = mock.access.clone().unwrap();
        let reader = Arc::new(Reader::new());
        reader.apply_identity(mock.identity());
        let (_, rx) = watch::channel(ActiveReaderSnapshot::connected(reader));
        (TagReaderWriter::new(rx, ProgressReporter::default()), access)
    }

    #[tokio::test]
    async fn test_run_operation_always_disables() {
        let op = MockAccessOperation::new();
        op.fail_next(MockStep::Start, "antenna fault");

        let result = run_operation(&op).await;
        assert!(matches!(result, Err(Error::Device { .. })));
        assert_eq!(op.calls(), vec![MockStep::Enable, MockStep::Start, MockStep::Disable]);
        assert!(!op.is_enabled());
    }

    #[tokio::test]
    async fn test_run_operation_reports_disable_failure() {
        let op = MockAccessOperation::new();
        op.fail_next(MockStep::Disable, "busy");
        assert!(run_operation(&op).await.is_err());
        assert_eq!(op.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_no_active_reader() {
        let (_, rx) = watch::channel(ActiveReaderSnapshot::default());
        let mut writer = TagReaderWriter::new(rx, ProgressReporter::default());
        let result = writer.read_tags(None, MemoryBank::Tid, 0, 2, None).await;
        assert!(matches!(result, Err(Error::NoActiveReader)));
    }

    #[tokio::test]
    async fn test_reader_still_binding() {
        let mock = MockReaderBuilder::new().build();
        let reader = Arc::new(Reader::new());
        reader.apply_identity(mock.identity());
        let (_, rx) = watch::channel(ActiveReaderSnapshot {
            reader: Some(reader),
            state: ReaderState::Connecting,
        });
        let mut writer = TagReaderWriter::new(rx, ProgressReporter::default());
        let result = writer.read_tags(None, MemoryBank::Tid, 0, 2, None).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(mock.access.unwrap().runs().is_empty());
    }

    #[tokio::test]
    async fn test_reader_without_access_capability() {
        let mock = MockReaderBuilder::new().transponder_access(false).build();
        let reader = Arc::new(Reader::new());
        reader.apply_identity(mock.identity());
        let (_, rx) = watch::channel(ActiveReaderSnapshot::connected(reader));
        let mut writer = TagReaderWriter::new(rx, ProgressReporter::default());

        let result = writer.read_tags(None, MemoryBank::Tid, 0, 2, None).await;
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }

    #[tokio::test]
    async fn test_read_narrates_each_tag() {
        let (mut writer, access) = writer_for(
            MockReaderBuilder::new()
                .power_range(12, 27)
                .tags(vec![SimulatedTag::new("3008", -40), SimulatedTag::new("3009", -45)]),
        );
        let mut progress = writer.progress().subscribe();

        let count = writer
            .read_tags(None, MemoryBank::Tid, 0, 2, Some(40))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(writer.maximum_output_power(), 27);
        assert_eq!(access.runs()[0].filter.output_power, Some(27));

        let lines = drain_progress(&mut progress);
        assert_eq!(
            lines,
            vec!["EPC: 3008", "Data: E2801105", "", "EPC: 3009", "Data: E2801105", ""]
        );
    }

    #[tokio::test]
    async fn test_write_expects_one_tag() {
        let (mut writer, access) = writer_for(MockReaderBuilder::new().tags(vec![
            SimulatedTag::new("3008", -40),
            SimulatedTag::new("3009", -45),
        ]));
        let mut progress = writer.progress().subscribe();

        let count = writer
            .write_tags(Some("3009"), MemoryBank::User, 0, "CAFE", None)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let run = &access.runs()[0];
        assert!(run.filter.expect_one);
        assert_eq!(run.filter.epc.as_deref(), Some("3009"));
        assert!(drain_progress(&mut progress).contains(&"Written: 1 words".to_string()));
    }

    #[tokio::test]
    async fn test_write_rejects_bad_hex() {
        let (mut writer, access) = writer_for(MockReaderBuilder::new());
        let result = writer
            .write_tags(None, MemoryBank::User, 0, "CAF", None)
            .await;
        assert!(matches!(result, Err(Error::Parse(_))));
        assert!(access.runs().is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_narrated() {
        let (mut writer, access) = writer_for(MockReaderBuilder::new());
        let mut failed = TransponderData::new("3008");
        failed.backscatter_error = Some("MemoryLocked".to_string());
        failed.access_error = Some("Timeout".to_string());
        access.push_result(vec![failed]);
        let mut progress = writer.progress().subscribe();

        writer
            .read_tags(None, MemoryBank::User, 0, 1, None)
            .await
            .unwrap();
        let lines = drain_progress(&mut progress);
        assert!(lines.contains(&"TAG ERROR: MemoryLocked".to_string()));
        assert!(lines.contains(&"READER ERROR: Timeout".to_string()));
    }
}
