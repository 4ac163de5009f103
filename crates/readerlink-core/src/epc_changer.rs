//! Changing the EPC of the single tag closest to the reader.
//!
//! [`ProximityEpcChanger::change_epc`] runs a fixed sequence against the
//! active reader's transponder access capability:
//!
//! 1. Validate the new identifier (no device traffic on failure)
//! 2. Discover tags at reduced power, reporting PC word and RSSI
//! 3. Require exactly one tag, with a PC word and a strong enough signal
//! 4. Write the new identifier, and a new PC word if the length changes
//! 5. Require one response with every word written
//! 6. Read the TID back through the new identifier
//!
//! Only discovery lowers the output power. The write and the read-back
//! address the selected tag by EPC and run at the reader's own setting.
//!
//! Every step is narrated on a [`ProgressReporter`]. Outcomes where the
//! device answered but the result is wrong are returned as
//! [`EpcChangeOutcome`] values; only invalid input and a missing reader or
//! capability are errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use readerlink_types::tag::{EPC_WORD_OFFSET, MAX_EPC_WORDS, PC_WORD_OFFSET, pc_with_length};
use readerlink_types::{MemoryBank, TagAccess, TagFields, TagFilter, TagMemory, TransponderData};

use crate::error::{Error, Result};
use crate::events::ProgressReporter;
use crate::session::ActiveReaderSnapshot;
use crate::tag_access::{active_access_operation, collect_responses, run_operation};
use crate::traits::TransponderAccessOperation;

/// Tuning for the EPC change sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpcChangerConfig {
    /// Highest output power used to look for the tag, in dBm.
    pub discovery_power_ceiling: i32,
    /// Weakest acceptable signal from the tag, in dBm.
    pub minimum_rssi: i32,
    /// Words read from the TID bank to verify the change.
    pub tid_word_count: u16,
}

impl Default for EpcChangerConfig {
    fn default() -> Self {
        Self {
            discovery_power_ceiling: 22,
            minimum_rssi: -50,
            tid_word_count: 2,
        }
    }
}

impl EpcChangerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tid_word_count == 0 {
            return Err(Error::invalid_config("tid_word_count must be greater than 0"));
        }
        Ok(())
    }
}

/// Result of an EPC change attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EpcChangeOutcome {
    /// The new EPC was written. `verified` is whether the tag answered a
    /// TID read through the new EPC.
    Changed { previous: String, verified: bool },
    /// The discovery run failed on the device.
    DiscoveryFailed { message: String },
    /// No tag answered discovery.
    NoTagFound,
    /// More than one tag answered discovery.
    MultipleTags { count: usize },
    /// The tag did not report its PC word.
    MissingPcWord,
    /// The tag did not report its signal strength.
    MissingSignal,
    /// The tag's signal was below the acceptance threshold.
    TooFar { rssi: i32 },
    /// The write run failed on the device.
    WriteFailed { message: String },
    /// The write was answered by a number of tags other than one.
    NotWritten { responses: usize },
    /// Fewer words than requested were written.
    IncompleteWrite { written: u16, expected: usize },
}

impl EpcChangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

impl fmt::Display for EpcChangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changed { previous, verified: true } => {
                write!(f, "EPC of {} changed and verified", previous)
            }
            Self::Changed { previous, verified: false } => {
                write!(f, "EPC of {} changed but not verified", previous)
            }
            Self::DiscoveryFailed { message } => {
                write!(f, "failed to find transponders: {}", message)
            }
            Self::NoTagFound => f.write_str("no tag found"),
            Self::MultipleTags { count } => write!(f, "multiple tags ({}) present", count),
            Self::MissingPcWord => f.write_str("unable to read tag PC word"),
            Self::MissingSignal => f.write_str("cannot verify that tag is close to the reader"),
            Self::TooFar { rssi } => write!(f, "tag is too far from reader ({} dBm)", rssi),
            Self::WriteFailed { message } => write!(f, "failed to write new EPC: {}", message),
            Self::NotWritten { responses } => {
                write!(f, "unable to write new EPC ({} responses)", responses)
            }
            Self::IncompleteWrite { written, expected } => {
                write!(f, "incomplete EPC written ({} of {} words)", written, expected)
            }
        }
    }
}

/// Rewrites the EPC of the tag nearest the active reader.
///
/// One change runs at a time per instance; callers must not run changes
/// from several instances against the same reader concurrently.
pub struct ProximityEpcChanger {
    active: watch::Receiver<ActiveReaderSnapshot>,
    config: EpcChangerConfig,
    progress: ProgressReporter,
    target: Option<String>,
}

impl ProximityEpcChanger {
    pub fn new(
        active: watch::Receiver<ActiveReaderSnapshot>,
        config: EpcChangerConfig,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            active,
            config,
            progress,
            target: None,
        }
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// EPC of the tag being, or last, modified.
    pub fn target_identifier(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Change the EPC of the single nearby tag to `new_epc` (hex).
    pub async fn change_epc(&mut self, new_epc: &str) -> Result<EpcChangeOutcome> {
        let new_epc = TagMemory::parse(new_epc).map_err(|e| Error::invalid_identifier(e.to_string()))?;
        if new_epc.is_empty() {
            return Err(Error::invalid_identifier("identifier is empty"));
        }
        if new_epc.length_words() > MAX_EPC_WORDS {
            return Err(Error::invalid_identifier(format!(
                "identifier is {} words, at most {} fit the PC word",
                new_epc.length_words(),
                MAX_EPC_WORDS
            )));
        }

        let operation = active_access_operation(&self.active)?;
        self.target = None;

        let power = self
            .config
            .discovery_power_ceiling
            .min(operation.maximum_output_power());

        let tag = match self.discover(operation.as_ref(), power).await {
            Ok(tag) => tag,
            Err(outcome) => return Ok(outcome),
        };
        // discover() only accepts tags reporting a PC word.
        let Some(pc) = tag.pc else {
            return Ok(EpcChangeOutcome::MissingPcWord);
        };
        let previous = tag.epc.clone();

        let access = if new_epc.as_hex().len() == previous.len() {
            TagAccess::write(MemoryBank::Epc, EPC_WORD_OFFSET, new_epc.clone())
        } else {
            let pc = pc_with_length(pc, new_epc.length_words()).ok_or_else(|| {
                Error::invalid_identifier("identifier length does not fit the PC word")
            })?;
            let data = TagMemory::parse(&format!("{:04x}{}", pc, new_epc.as_hex()))?;
            TagAccess::write(MemoryBank::Epc, PC_WORD_OFFSET, data)
        };
        let expected = access.word_count();

        self.progress.separator();
        self.progress.report("Changing EPC of tag...");
        info!("Changing EPC of {} to {}", previous, new_epc);

        operation.configure(TagFilter::for_epc(previous.clone()), Some(access));
        let mut results = operation.subscribe();
        let run = run_operation(operation.as_ref()).await;
        let responses = collect_responses(&mut results);
        drop(results);
        for response in &responses {
            self.narrate(response, Some(expected));
        }

        if let Err(e) = run {
            warn!("EPC write failed: {}", e);
            self.progress.report("Failed to write new EPC");
            self.progress.report(e.to_string());
            return Ok(EpcChangeOutcome::WriteFailed {
                message: e.to_string(),
            });
        }

        let [response] = responses.as_slice() else {
            if responses.is_empty() {
                self.progress.report("Unable to write new EPC!");
            }
            return Ok(EpcChangeOutcome::NotWritten {
                responses: responses.len(),
            });
        };
        let written = response.words_written.unwrap_or(0);
        if usize::from(written) != expected {
            return Ok(EpcChangeOutcome::IncompleteWrite { written, expected });
        }

        let verified = self.verify(operation.as_ref(), &new_epc).await;
        Ok(EpcChangeOutcome::Changed { previous, verified })
    }

    async fn discover(
        &mut self,
        operation: &dyn TransponderAccessOperation,
        power: i32,
    ) -> std::result::Result<TransponderData, EpcChangeOutcome> {
        self.progress.report("Scanning for tag to modify...");
        debug!("Discovering tags at {} dBm", power);

        operation.configure(
            TagFilter::all()
                .at_power(power)
                .report(TagFields::EPC | TagFields::PC | TagFields::RSSI),
            None,
        );
        if let Err(e) = run_operation(operation).await {
            warn!("Tag discovery failed: {}", e);
            self.progress.report("Failed to find transponders in range of reader");
            self.progress.report(e.to_string());
            return Err(EpcChangeOutcome::DiscoveryFailed {
                message: e.to_string(),
            });
        }

        let mut transponders = operation.transponders();
        match transponders.len() {
            0 => {
                self.progress.report("No tag found!");
                return Err(EpcChangeOutcome::NoTagFound);
            }
            1 => {}
            count => {
                self.progress.report(format!("Multiple tags ({}) present!", count));
                return Err(EpcChangeOutcome::MultipleTags { count });
            }
        }

        let tag = transponders.remove(0);
        self.target = Some(tag.epc.clone());
        self.progress.report(format!("Tag found: {}", tag.epc));

        if tag.pc.is_none() {
            self.progress.report("Unable to read Tag PC word!");
            return Err(EpcChangeOutcome::MissingPcWord);
        }
        let Some(rssi) = tag.rssi else {
            self.progress.report("Cannot verify that tag is close to the reader!");
            return Err(EpcChangeOutcome::MissingSignal);
        };
        if rssi < self.config.minimum_rssi {
            self.progress.report("Tag is too far from reader!");
            return Err(EpcChangeOutcome::TooFar { rssi });
        }
        Ok(tag)
    }

    async fn verify(
        &self,
        operation: &dyn TransponderAccessOperation,
        new_epc: &TagMemory,
    ) -> bool {
        self.progress.separator();
        self.progress.report("EPC changed - verifying with TID read...");

        operation.configure(
            TagFilter::for_epc(new_epc.as_hex()).report(TagFields::DEFAULT),
            Some(TagAccess::read(MemoryBank::Tid, 0, self.config.tid_word_count)),
        );
        self.progress.separator();
        self.progress.report(format!("Reading TID from: {}", new_epc));
        self.progress.separator();

        let mut results = operation.subscribe();
        let run = run_operation(operation).await;
        let responses = collect_responses(&mut results);
        drop(results);
        for response in &responses {
            self.narrate(response, None);
        }

        if let Err(e) = run {
            warn!("TID read-back failed: {}", e);
            self.progress.report("Failed to read the transponder by new EPC");
            self.progress.report(e.to_string());
            return false;
        }

        responses.iter().any(|r| {
            r.read_data.is_some() && r.backscatter_error.is_none() && r.access_error.is_none()
        })
    }

    fn narrate(&self, transponder: &TransponderData, expected_words: Option<usize>) {
        self.progress.report(format!("EPC: {}", transponder.epc));

        if let Some(data) = &transponder.read_data {
            if data.len() >= 8 {
                self.progress.report(format!("TID: {}", data));
                if data.to_ascii_uppercase().starts_with("E2") {
                    if let (Some(designer), Some(model)) = (data.get(2..5), data.get(5..8)) {
                        self.progress.report(format!("Designer Id: {}", designer));
                        self.progress.report(format!("Model Id: {}", model));
                    }
                }
            } else {
                self.progress.report(format!("ERROR Partial Read: {}", data));
            }
        } else if let Some(written) = transponder.words_written {
            self.progress.report(format!("Written: {} words", written));
            if let Some(expected) = expected_words {
                if usize::from(written) != expected {
                    if written == 0 {
                        self.progress.report("Unable to write new EPC!");
                    } else {
                        self.progress
                            .report(format!("Incomplete EPC written ({})", written));
                    }
                }
            }
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
