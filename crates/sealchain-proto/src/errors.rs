//! Error types for block (de)serialization.

use thiserror::Error;

/// Convenience alias used throughout the codec.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while serializing or parsing blocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a required field.
    #[error("truncated block: needed {needed} more bytes for {field}")]
    Truncated {
        /// Field that could not be read.
        field: &'static str,
        /// How many bytes were missing.
        needed: usize,
    },

    /// The envelope version is newer than this implementation understands.
    #[error("unsupported block format version {0}, upgrade required")]
    UnsupportedVersion(u8),

    /// The nature value is not one this implementation understands.
    #[error("unsupported block nature {0}, upgrade required")]
    UnsupportedNature(u64),

    /// A varint ran past its maximum width or the end of input.
    #[error("malformed varint in {field}")]
    MalformedVarint {
        /// Field being decoded.
        field: &'static str,
    },

    /// A variable-length field exceeded its size bound.
    #[error("{field} length {actual} exceeds limit {limit}")]
    FieldTooLarge {
        /// Field that was oversized.
        field: &'static str,
        /// Declared length.
        actual: usize,
        /// Maximum accepted length.
        limit: usize,
    },

    /// Bytes remained after the payload's fixed layout was consumed.
    #[error("{remaining} trailing bytes after {context}")]
    TrailingBytes {
        /// What was being parsed.
        context: &'static str,
        /// Number of unconsumed bytes.
        remaining: usize,
    },

    /// A flags byte carried bits this implementation does not know.
    #[error("unknown flag bits {value:#04x}")]
    UnknownFlags {
        /// The offending byte.
        value: u8,
    },
}
