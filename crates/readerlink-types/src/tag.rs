//! Transponder observations, tag memory and access request types.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Word offset of the protocol-control (PC) word within the EPC bank.
pub const PC_WORD_OFFSET: u16 = 1;

/// Word offset of the EPC identifier within the EPC bank.
pub const EPC_WORD_OFFSET: u16 = 2;

/// Mask of the PC word bits that are kept when the identifier length changes.
const PC_RESERVED_MASK: u16 = 0x07ff;

/// Bit position of the identifier length (in words) inside the PC word.
const PC_LENGTH_SHIFT: u16 = 11;

/// Longest identifier, in words, the five-bit PC length field can encode.
pub const MAX_EPC_WORDS: usize = 31;

/// One tag (transponder) response reported by a reader.
///
/// Optional fields are only present when the reader was asked to report
/// them (see [`TagFields`]) or when the operation produced them.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransponderData {
    /// EPC identifier as hex.
    pub epc: String,
    /// When the tag was seen. `None` means the reader did not time-stamp it.
    pub timestamp: Option<OffsetDateTime>,
    /// Received signal strength in dBm.
    pub rssi: Option<i32>,
    /// Protocol-control word.
    pub pc: Option<u16>,
    /// Channel frequency in kHz.
    pub channel_frequency: Option<i32>,
    /// Backscatter phase.
    pub phase: Option<i32>,
    /// Checksum reported with the identifier.
    pub crc: Option<u16>,
    /// Index of the response within the inventory round.
    pub index: Option<u32>,
    /// Hex data returned by a read access.
    pub read_data: Option<String>,
    /// Number of words written by a write access.
    pub words_written: Option<u16>,
    /// Error code reported by the tag.
    pub backscatter_error: Option<String>,
    /// Error code reported by the reader while accessing the tag.
    pub access_error: Option<String>,
}

impl TransponderData {
    /// Create an observation carrying only an identifier.
    pub fn new(epc: impl Into<String>) -> Self {
        Self {
            epc: epc.into(),
            ..Default::default()
        }
    }

    /// Set the observation timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the signal strength in dBm.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the protocol-control word.
    #[must_use]
    pub fn with_pc(mut self, pc: u16) -> Self {
        self.pc = Some(pc);
        self
    }

    /// Set channel frequency and phase.
    #[must_use]
    pub fn with_channel(mut self, channel_frequency: i32, phase: i32) -> Self {
        self.channel_frequency = Some(channel_frequency);
        self.phase = Some(phase);
        self
    }

    /// Set the number of words written.
    #[must_use]
    pub fn with_words_written(mut self, words: u16) -> Self {
        self.words_written = Some(words);
        self
    }

    /// Set the data read from the tag.
    #[must_use]
    pub fn with_read_data(mut self, data: impl Into<String>) -> Self {
        self.read_data = Some(data.into());
        self
    }
}

/// A group of observations delivered together.
///
/// `end_of_pass` closes the logical scan cycle the batch belongs to.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransponderBatch {
    /// Observations in arrival order.
    pub transponders: Vec<TransponderData>,
    /// Whether this batch ends the current pass.
    pub end_of_pass: bool,
}

impl TransponderBatch {
    /// Create a batch.
    pub fn new(transponders: Vec<TransponderData>, end_of_pass: bool) -> Self {
        Self {
            transponders,
            end_of_pass,
        }
    }

    /// Number of observations in the batch.
    pub fn len(&self) -> usize {
        self.transponders.len()
    }

    /// Whether the batch carries no observations.
    pub fn is_empty(&self) -> bool {
        self.transponders.is_empty()
    }
}

/// Set of per-observation fields a reader is asked to report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TagFields(u16);

impl TagFields {
    pub const NONE: Self = Self(0);
    pub const EPC: Self = Self(1);
    pub const CHANNEL: Self = Self(1 << 1);
    pub const CRC: Self = Self(1 << 2);
    pub const INDEX: Self = Self(1 << 3);
    pub const PC: Self = Self(1 << 4);
    pub const PHASE: Self = Self(1 << 5);
    pub const RSSI: Self = Self(1 << 6);
    pub const TID: Self = Self(1 << 7);

    /// The reader's own default report, which always carries the identifier.
    pub const DEFAULT: Self = Self::EPC;

    const NAMES: [(Self, &'static str); 8] = [
        (Self::EPC, "EPC"),
        (Self::CHANNEL, "CHANNEL"),
        (Self::CRC, "CRC"),
        (Self::INDEX, "INDEX"),
        (Self::PC, "PC"),
        (Self::PHASE, "PHASE"),
        (Self::RSSI, "RSSI"),
        (Self::TID, "TID"),
    ];

    /// Whether every field in `other` is also in `self`.
    #[must_use]
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add `other` when `condition` holds.
    #[must_use]
    pub fn with_if(self, condition: bool, other: Self) -> Self {
        if condition { self | other } else { self }
    }

    /// Raw bit representation.
    #[must_use]
    pub fn bits(&self) -> u16 {
        self.0
    }
}

impl BitOr for TagFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TagFields {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TagFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(field, _)| self.contains(*field))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "TagFields(NONE)")
        } else {
            write!(f, "TagFields({})", names.join(" | "))
        }
    }
}

/// Tag memory bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum MemoryBank {
    /// Kill and access passwords.
    Reserved = 0,
    /// CRC, PC word and EPC identifier.
    Epc = 1,
    /// Read-only tag identity (designer and model ids).
    Tid = 2,
    /// User memory.
    User = 3,
}

impl TryFrom<u8> for MemoryBank {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reserved),
            1 => Ok(Self::Epc),
            2 => Ok(Self::Tid),
            3 => Ok(Self::User),
            _ => Err(ParseError::UnknownMemoryBank(value)),
        }
    }
}

/// Word-aligned tag memory content expressed as hex.
///
/// Whitespace in the input is ignored; the stored form is lower-case hex
/// with no separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TagMemory {
    hex: String,
}

impl TagMemory {
    /// Parse word-aligned hex.
    ///
    /// # Examples
    ///
    /// ```
    /// use readerlink_types::TagMemory;
    ///
    /// let memory = TagMemory::parse("3000 1234").unwrap();
    /// assert_eq!(memory.length_words(), 2);
    /// assert_eq!(memory.as_hex(), "30001234");
    ///
    /// assert!(TagMemory::parse("123").is_err());
    /// assert!(TagMemory::parse("12G4").is_err());
    /// ```
    pub fn parse(value: &str) -> ParseResult<Self> {
        let mut hex = String::with_capacity(value.len());
        for (position, character) in value.chars().enumerate() {
            if character.is_ascii_hexdigit() {
                hex.push(character.to_ascii_lowercase());
            } else if !character.is_whitespace() {
                return Err(ParseError::InvalidHexCharacter {
                    character,
                    position,
                });
            }
        }

        if hex.len() % 4 != 0 {
            return Err(ParseError::NotWordAligned { digits: hex.len() });
        }

        Ok(Self { hex })
    }

    /// Build tag memory from 16-bit words.
    pub fn from_words(words: &[u16]) -> Self {
        let hex = words.iter().map(|w| format!("{:04x}", w)).collect();
        Self { hex }
    }

    /// Lower-case hex without separators.
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Length in 16-bit words.
    pub fn length_words(&self) -> usize {
        self.hex.len() / 4
    }

    /// Length in bytes.
    pub fn length_bytes(&self) -> usize {
        self.hex.len() / 2
    }

    /// Whether no words are held.
    pub fn is_empty(&self) -> bool {
        self.hex.is_empty()
    }
}

impl fmt::Display for TagMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Whether `value` is non-empty hex forming whole 16-bit words.
///
/// Whitespace between digits is permitted.
///
/// # Examples
///
/// ```
/// use readerlink_types::is_valid_word_aligned_hex;
///
/// assert!(is_valid_word_aligned_hex("ABCD 0123"));
/// assert!(!is_valid_word_aligned_hex("ABC"));
/// assert!(!is_valid_word_aligned_hex(""));
/// ```
pub fn is_valid_word_aligned_hex(value: &str) -> bool {
    matches!(TagMemory::parse(value), Ok(memory) if !memory.is_empty())
}

/// Return `pc` with its identifier length field set to `length_words`.
///
/// The low eleven bits (flags, AFI, reserved) are preserved. Returns `None`
/// when the length does not fit the field (more than [`MAX_EPC_WORDS`]).
///
/// # Examples
///
/// ```
/// use readerlink_types::tag::pc_with_length;
///
/// assert_eq!(pc_with_length(0x3000, 8), Some(0x4000));
/// assert_eq!(pc_with_length(0x3412, 4), Some(0x2412));
/// assert_eq!(pc_with_length(0x3000, 32), None);
/// ```
pub fn pc_with_length(pc: u16, length_words: usize) -> Option<u16> {
    if length_words > MAX_EPC_WORDS {
        return None;
    }
    let length = u16::try_from(length_words).ok()?;
    Some((pc & PC_RESERVED_MASK) | (length << PC_LENGTH_SHIFT))
}

/// Identifier length in words encoded in a PC word.
pub fn length_from_pc(pc: u16) -> u16 {
    (pc & !PC_RESERVED_MASK) >> PC_LENGTH_SHIFT
}

/// Which tags an operation addresses, at what power, and what is reported.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TagFilter {
    /// Select only the tag with this identifier. `None` selects every tag.
    pub epc: Option<String>,
    /// Antenna output power in dBm. `None` keeps the reader's setting.
    pub output_power: Option<i32>,
    /// Fields reported per tag.
    pub report: TagFields,
    /// Stop after the first tag responds.
    pub expect_one: bool,
}

impl TagFilter {
    /// Address every tag in range.
    pub fn all() -> Self {
        Self {
            report: TagFields::DEFAULT,
            ..Default::default()
        }
    }

    /// Address only the tag with the given identifier.
    pub fn for_epc(epc: impl Into<String>) -> Self {
        Self {
            epc: Some(epc.into()),
            ..Self::all()
        }
    }

    /// Set the output power.
    #[must_use]
    pub fn at_power(mut self, output_power: i32) -> Self {
        self.output_power = Some(output_power);
        self
    }

    /// Set the reported fields.
    #[must_use]
    pub fn report(mut self, fields: TagFields) -> Self {
        self.report = fields;
        self
    }

    /// Expect a single tag to respond.
    #[must_use]
    pub fn expect_one(mut self) -> Self {
        self.expect_one = true;
        self
    }
}

/// What a transponder access operation does to each selected tag.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TagAccess {
    /// Read `word_count` words starting at `word_address`.
    Read {
        bank: MemoryBank,
        word_address: u16,
        word_count: u16,
    },
    /// Write `data` starting at `word_address`.
    Write {
        bank: MemoryBank,
        word_address: u16,
        data: TagMemory,
    },
}

impl TagAccess {
    /// Create a read request.
    pub fn read(bank: MemoryBank, word_address: u16, word_count: u16) -> Self {
        Self::Read {
            bank,
            word_address,
            word_count,
        }
    }

    /// Create a write request.
    pub fn write(bank: MemoryBank, word_address: u16, data: TagMemory) -> Self {
        Self::Write {
            bank,
            word_address,
            data,
        }
    }

    /// Number of words the request reads or writes.
    pub fn word_count(&self) -> usize {
        match self {
            Self::Read { word_count, .. } => usize::from(*word_count),
            Self::Write { data, .. } => data.length_words(),
        }
    }

    /// Memory bank addressed by the request.
    pub fn bank(&self) -> MemoryBank {
        match self {
            Self::Read { bank, .. } | Self::Write { bank, .. } => *bank,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_memory_parse_normalizes() {
        let memory = TagMemory::parse(" ABCD\t0123 ").unwrap();
        assert_eq!(memory.as_hex(), "abcd0123");
        assert_eq!(memory.length_words(), 2);
        assert_eq!(memory.length_bytes(), 4);
    }

    #[test]
    fn test_tag_memory_parse_rejects_bad_character() {
        let err = TagMemory::parse("12x4").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidHexCharacter {
                character: 'x',
                position: 2
            }
        );
    }

    #[test]
    fn test_tag_memory_parse_rejects_partial_word() {
        let err = TagMemory::parse("123456").unwrap_err();
        assert_eq!(err, ParseError::NotWordAligned { digits: 6 });
        assert!(err.to_string().contains("multiple of 4"));
    }

    #[test]
    fn test_tag_memory_parse_empty_is_zero_words() {
        let memory = TagMemory::parse("   ").unwrap();
        assert!(memory.is_empty());
        assert!(!is_valid_word_aligned_hex("   "));
    }

    #[test]
    fn test_tag_memory_from_words() {
        let memory = TagMemory::from_words(&[0x3000, 0x00ff]);
        assert_eq!(memory.as_hex(), "300000ff");
    }

    #[test]
    fn test_pc_length_round_trip() {
        let pc = pc_with_length(0x3000, 6).unwrap();
        assert_eq!(length_from_pc(pc), 6);
        assert_eq!(length_from_pc(0x3000), 6);
        assert_eq!(length_from_pc(0x4000), 8);
    }

    #[test]
    fn test_pc_with_length_keeps_low_bits() {
        let pc = pc_with_length(0xffff, 1).unwrap();
        assert_eq!(pc & 0x07ff, 0x07ff);
        assert_eq!(pc >> 11, 1);
    }

    #[test]
    fn test_pc_with_length_rejects_overflow() {
        let longest = pc_with_length(0x3000, MAX_EPC_WORDS).unwrap();
        assert_eq!(length_from_pc(longest), 31);
        assert_eq!(pc_with_length(0x3000, MAX_EPC_WORDS + 1), None);
        assert_eq!(pc_with_length(0x3000, 64), None);
    }

    #[test]
    fn test_tag_fields() {
        let fields = TagFields::DEFAULT | TagFields::RSSI | TagFields::PC;
        assert!(fields.contains(TagFields::EPC));
        assert!(fields.contains(TagFields::RSSI | TagFields::PC));
        assert!(!fields.contains(TagFields::PHASE));
        assert_eq!(format!("{:?}", fields), "TagFields(EPC | PC | RSSI)");
        assert_eq!(format!("{:?}", TagFields::NONE), "TagFields(NONE)");
    }

    #[test]
    fn test_tag_fields_with_if() {
        let fields = TagFields::EPC
            .with_if(true, TagFields::CHANNEL)
            .with_if(false, TagFields::CRC);
        assert!(fields.contains(TagFields::CHANNEL));
        assert!(!fields.contains(TagFields::CRC));
    }

    #[test]
    fn test_tag_filter_builders() {
        let filter = TagFilter::for_epc("3000").at_power(22).expect_one();
        assert_eq!(filter.epc.as_deref(), Some("3000"));
        assert_eq!(filter.output_power, Some(22));
        assert!(filter.expect_one);
        assert_eq!(filter.report, TagFields::DEFAULT);
        assert!(TagFilter::all().epc.is_none());
    }

    #[test]
    fn test_tag_access_word_count() {
        let read = TagAccess::read(MemoryBank::Tid, 0, 2);
        assert_eq!(read.word_count(), 2);
        assert_eq!(read.bank(), MemoryBank::Tid);

        let write = TagAccess::write(
            MemoryBank::Epc,
            EPC_WORD_OFFSET,
            TagMemory::parse("1111 2222 3333").unwrap(),
        );
        assert_eq!(write.word_count(), 3);
    }

    #[test]
    fn test_memory_bank_try_from() {
        assert_eq!(MemoryBank::try_from(2), Ok(MemoryBank::Tid));
        assert_eq!(
            MemoryBank::try_from(9),
            Err(ParseError::UnknownMemoryBank(9))
        );
    }

    #[test]
    fn test_transponder_builder() {
        let data = TransponderData::new("AAAA")
            .with_rssi(-45)
            .with_pc(0x3000)
            .with_channel(865700, 12);
        assert_eq!(data.rssi, Some(-45));
        assert_eq!(data.pc, Some(0x3000));
        assert_eq!(data.channel_frequency, Some(865700));
        assert_eq!(data.phase, Some(12));
        assert!(data.timestamp.is_none());
    }
}
