//! Shared types for head clients
//!
//! Identity and value types every layer of the client agrees on:
//! - `TxId` / `UnitRef`: identity of a transaction and of one of its outputs
//! - `ChainUnit`: one unspent output as mirrored from the coordinator
//! - `Value`: coin plus a multi-asset bag
//! - `Address` / `Credential` / `Network`: enterprise addresses and bech32

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod address;

pub use address::{bytes_to_bech32, Address, Credential};

/// Blake2b-224 hash of a verification key or script
pub type KeyHash = [u8; 28];

/// Index of a participant on the packet bus (the game's node number)
pub type PeerIndex = u32;

/// Errors produced while parsing identity and address types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid unit reference: {0}")]
    InvalidUnitRef(String),

    #[error("bech32 error: {0}")]
    Bech32(String),

    #[error("unsupported address header 0x{0:02x}")]
    UnsupportedAddress(u8),
}

/// Ledger network the head runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

impl Network {
    /// Network id as carried in the low nibble of an address header
    pub fn id(self) -> u8 {
        match self {
            Network::Testnet => 0,
            Network::Mainnet => 1,
        }
    }

    pub fn from_id(id: u8) -> Self {
        if id == 1 {
            Network::Mainnet
        } else {
            Network::Testnet
        }
    }

    /// Human readable prefix for bech32 addresses
    pub fn address_hrp(self) -> &'static str {
        match self {
            Network::Testnet => "addr_test",
            Network::Mainnet => "addr",
        }
    }
}

/// Transaction identifier (Blake2b-256 of the transaction body)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        Ok(Self(decode_fixed::<32>(s)?))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Identity of a chain unit: `(tx_id, index)`, rendered as `"{tx_id}#{index}"`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct UnitRef {
    pub tx_id: TxId,
    pub index: u64,
}

impl UnitRef {
    pub fn new(tx_id: TxId, index: u64) -> Self {
        Self { tx_id, index }
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_id, self.index)
    }
}

impl FromStr for UnitRef {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tx, idx) = s
            .split_once('#')
            .ok_or_else(|| TypesError::InvalidUnitRef(s.to_string()))?;
        let index = idx
            .parse::<u64>()
            .map_err(|_| TypesError::InvalidUnitRef(s.to_string()))?;
        Ok(Self {
            tx_id: TxId::from_hex(tx)?,
            index,
        })
    }
}

/// Policy id -> asset name -> quantity
pub type AssetBag = BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, u64>>;

/// Coin plus native assets held by a chain unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value {
    pub coin: u64,
    pub assets: AssetBag,
}

impl Value {
    pub fn coin(coin: u64) -> Self {
        Self {
            coin,
            assets: AssetBag::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.coin == 0 && self.assets.values().all(|names| names.values().all(|q| *q == 0))
    }

    /// Quantity of a given asset, zero when absent
    pub fn quantity_of(&self, policy: &[u8], name: &[u8]) -> u64 {
        self.assets
            .get(policy)
            .and_then(|names| names.get(name))
            .copied()
            .unwrap_or(0)
    }
}

/// One unspent output of the head's ledger
///
/// Immutable once created and consumed at most once. Identity is `unit_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUnit {
    pub unit_ref: UnitRef,
    /// Bech32 address (hex for addresses without a bech32 form)
    pub owner_address: String,
    pub value: Value,
    /// Inline datum bytes, if any
    pub payload: Option<Vec<u8>>,
    /// Datum hash when the output only commits to a datum
    pub datum_hash: Option<Vec<u8>>,
}

impl ChainUnit {
    /// Whether the output carries or commits to any datum
    pub fn has_payload(&self) -> bool {
        self.payload.is_some() || self.datum_hash.is_some()
    }
}

/// Decode a hex string into a fixed-size array
pub fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let bytes = hex::decode(s).map_err(|_| TypesError::InvalidHex(s.to_string()))?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| TypesError::InvalidLength { expected: N, actual })
}
