//! Head Codec - structured data on the channel
//!
//! Encodes and decodes the application's payloads in the ledger's native
//! structured-data format (CBOR-encoded Plutus data).
//!
//! Layers:
//! - `cbor`: raw header-level reader/writer, shared with the transaction codec
//! - `plutus`: the `PlutusData` value model and its canonical encoding
//! - `schema`: packets, packet batches and game records on top of the model

pub mod cbor;
pub mod error;
pub mod plutus;
pub mod schema;

pub use cbor::{Header, Reader, Writer};
pub use error::{DecodeError, EncodeError};
pub use plutus::PlutusData;
pub use schema::{
    decode_game_record, decode_packet_batch, decode_payload, encode_game_record,
    encode_packet_batch, payload_from_data, GameRecord, GameState, Packet, PacketBatch, Payload,
};

/// Constants
pub mod constants {
    /// Maximum container nesting accepted by the decoders
    pub const MAX_DEPTH: usize = 64;
    /// Byte strings longer than this are chunked
    pub const BYTES_CHUNK: usize = 64;

    // Constructor tags
    /// Tag of constructor alternative 0 (alternatives 0..=6)
    pub const CONSTR_TAG_BASE: u64 = 121;
    /// Tag of constructor alternative 7 (alternatives 7..=127)
    pub const CONSTR_TAG_EXT_BASE: u64 = 1280;
    /// General constructor form `102([alt, fields])`
    pub const CONSTR_GENERAL_TAG: u64 = 102;

    // Bignums
    pub const BIGNUM_POS_TAG: u64 = 2;
    pub const BIGNUM_NEG_TAG: u64 = 3;

    /// Length of a Blake2b-224 key hash
    pub const KEY_HASH_LEN: usize = 28;
}
