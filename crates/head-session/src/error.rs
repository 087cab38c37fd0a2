//! Session errors

use head_codec::DecodeError;
use head_types::TypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid coordinator url {0}")]
    InvalidUrl(String),

    #[error("snapshot request failed with status {0}")]
    SnapshotStatus(u16),

    #[error("malformed snapshot entry {key}: {reason}")]
    MalformedSnapshot { key: String, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("connection closed")]
    Closed,

    #[error("transaction {0} was rejected")]
    Rejected(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),
}
