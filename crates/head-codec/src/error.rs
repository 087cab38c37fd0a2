//! Codec Errors

use thiserror::Error;

/// Decoding errors
///
/// Every decode path returns one of these instead of panicking; callers
/// that sniff arbitrary payloads treat any of them as "not ours".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("invalid initial byte 0x{0:02x}")]
    InvalidHeader(u8),

    #[error("expected {expected}, found major type {found}")]
    UnexpectedType { expected: &'static str, found: u8 },

    #[error("length {0} exceeds input")]
    LengthTooLarge(u64),

    #[error("nesting deeper than {0}")]
    DepthExceeded(usize),

    #[error("integer does not fit in 128 bits")]
    IntegerOverflow,

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("unsupported tag {0}")]
    UnsupportedTag(u64),

    #[error("expected constructor {expected}, found {found}")]
    WrongConstructor { expected: u64, found: u64 },

    #[error("expected {expected} fields, found {found}")]
    WrongArity { expected: usize, found: usize },

    #[error("expected {0}")]
    UnexpectedData(&'static str),

    #[error("{0} out of range")]
    OutOfRange(&'static str),

    #[error("invalid json datum: {0}")]
    InvalidJson(String),
}

/// Encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("packet batch is empty")]
    EmptyBatch,

    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}
