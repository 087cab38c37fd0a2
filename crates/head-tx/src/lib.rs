//! Head Tx - per-frame chain units
//!
//! Builds, signs and decodes the single-input single-output transactions a
//! head client chains together, and holds the session key they are signed
//! with.

pub mod builder;
pub mod decode;
pub mod error;
pub mod hash;
pub mod keys;
pub mod script;

pub use builder::{
    script_data_hash, BuilderConfig, BuiltUnit, Destination, Guard, TxBuilder, DEFAULT_MAX_TX_SIZE,
};
pub use decode::{DecodedOutput, DecodedTx};
pub use error::{BuildError, KeyError};
pub use hash::{blake2b_224, blake2b_256, tx_id};
pub use keys::{ClientKeySet, TextEnvelope};
pub use script::{ExUnits, NativeScript, ValidatorRef};
