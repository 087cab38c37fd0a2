//! Builder and key errors

use head_types::TypesError;
use thiserror::Error;

/// Reasons a unit cannot be built
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("no spendable input")]
    NoInput,

    #[error("payload of {0} bytes cannot be length-prefixed")]
    PayloadTooLarge(usize),

    #[error("transaction of {size} bytes exceeds maximum {max}")]
    TxTooLarge { size: usize, max: usize },

    #[error("no guard known for input address {0}")]
    UnknownGuard(String),

    #[error("validator destination without a configured validator")]
    MissingValidator,

    #[error("any-of destination without a configured admin key")]
    MissingScript,

    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Key loading and storage errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key file: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("expected {expected} key bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
