//! Coordinator wire messages
//!
//! Inbound messages are JSON objects discriminated by `tag`. Only the tags
//! a client reacts to are modelled; everything else lands in `Other`.

use serde::{Deserialize, Serialize};

/// Era tag sent with every submitted transaction
pub const DEFAULT_ERA: &str = "Tx BabbageEra";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tag")]
pub enum CoordinatorMessage {
    Greetings {},
    TxValid {
        #[serde(default)]
        transaction: Option<TransactionEnvelope>,
        #[serde(default, rename = "transactionId")]
        transaction_id: Option<String>,
    },
    TxInvalid {
        #[serde(default)]
        transaction: Option<TransactionEnvelope>,
        #[serde(default, rename = "transactionId")]
        transaction_id: Option<String>,
        #[serde(default, rename = "validationError")]
        validation_error: Option<serde_json::Value>,
    },
    SnapshotConfirmed {
        snapshot: SnapshotSummary,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    #[serde(default, rename = "txId", skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, rename = "cborHex")]
    pub cbor_hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSummary {
    #[serde(default, rename = "snapshotNumber")]
    pub number: Option<u64>,
    #[serde(default, rename = "confirmedTransactions")]
    pub confirmed: Vec<ConfirmedEntry>,
}

/// Confirmed transactions are listed either by id or as full objects
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfirmedEntry {
    Id(String),
    Tx {
        #[serde(rename = "txId")]
        tx_id: String,
    },
}

impl ConfirmedEntry {
    pub fn tx_id(&self) -> &str {
        match self {
            ConfirmedEntry::Id(id) => id,
            ConfirmedEntry::Tx { tx_id } => tx_id,
        }
    }
}

impl CoordinatorMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Transaction id of a `TxValid` / `TxInvalid`
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            CoordinatorMessage::TxValid {
                transaction,
                transaction_id,
            }
            | CoordinatorMessage::TxInvalid {
                transaction,
                transaction_id,
                ..
            } => transaction
                .as_ref()
                .and_then(|t| t.tx_id.as_deref())
                .or(transaction_id.as_deref()),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CoordinatorMessage::Greetings {} => "Greetings",
            CoordinatorMessage::TxValid { .. } => "TxValid",
            CoordinatorMessage::TxInvalid { .. } => "TxInvalid",
            CoordinatorMessage::SnapshotConfirmed { .. } => "SnapshotConfirmed",
            CoordinatorMessage::Other => "Other",
        }
    }
}

/// Messages sent to the coordinator
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "tag")]
pub enum ClientMessage {
    NewTx { transaction: TransactionEnvelope },
}

impl ClientMessage {
    pub fn new_tx(era: &str, cbor_hex: String) -> Self {
        ClientMessage::NewTx {
            transaction: TransactionEnvelope {
                tx_id: None,
                kind: era.to_string(),
                cbor_hex,
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
