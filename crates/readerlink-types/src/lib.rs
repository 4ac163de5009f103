//! Platform-agnostic types for RFID reader sessions.
//!
//! This crate provides the value types shared by the session manager, the
//! inventory aggregator and the tag access orchestrator in
//! `readerlink-core`. Nothing here performs I/O.
//!
//! # Features
//!
//! - Transport and reader connection states
//! - Transponder observations and observation batches
//! - Word-aligned hex tag memory and PC word helpers
//! - Tag filters, report fields and access requests
//!
//! # Example
//!
//! ```
//! use readerlink_types::{TagAccess, TagMemory, MemoryBank, tag::EPC_WORD_OFFSET};
//!
//! let epc = TagMemory::parse("3000 0000 0000 0001").unwrap();
//! let access = TagAccess::write(MemoryBank::Epc, EPC_WORD_OFFSET, epc);
//! assert_eq!(access.word_count(), 4);
//! ```

pub mod error;
pub mod tag;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use tag::{
    MemoryBank, TagAccess, TagFields, TagFilter, TagMemory, TransponderBatch, TransponderData,
    is_valid_word_aligned_hex,
};
pub use types::{ReaderState, TransportKind, TransportState};
