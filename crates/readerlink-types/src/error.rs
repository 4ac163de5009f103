//! Error types for value parsing in readerlink-types.

use thiserror::Error;

/// Errors that can occur when parsing tag and reader values.
///
/// This error type is transport-agnostic and does not include
/// device communication errors (those belong in readerlink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A character that is neither hex nor whitespace was found.
    #[error("Invalid hex character '{character}' at position {position}")]
    InvalidHexCharacter {
        /// The offending character.
        character: char,
        /// Character index within the input.
        position: usize,
    },

    /// The hex digits do not form whole 16-bit words.
    #[error("Tag memory is 16 bit words: {digits} hex digits is not a multiple of 4")]
    NotWordAligned {
        /// Number of hex digits found.
        digits: usize,
    },

    /// The value was empty where at least one word is required.
    #[error("Empty value: {0}")]
    Empty(String),

    /// Unknown memory bank number.
    #[error("Unknown memory bank: {0}")]
    UnknownMemoryBank(u8),
}

/// Result type alias using readerlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
