//! Head Session - coordinator client
//!
//! Streams transactions from a head coordinator, keeps a local mirror of
//! its unspent set, submits signed units and measures how long each takes
//! to be seen and confirmed.

pub mod error;
pub mod message;
pub mod mirror;
pub mod session;
pub mod snapshot;
pub mod timing;
pub mod transport;

pub use error::SessionError;
pub use message::{ClientMessage, CoordinatorMessage, DEFAULT_ERA};
pub use mirror::UnitMirror;
pub use session::{http_url, websocket_url, Session, SessionConfig, SessionEvent};
pub use snapshot::{parse_snapshot, HttpSnapshotSource, MemorySnapshot, SnapshotSource};
pub use timing::{LatencySummary, TimingConfig, TimingTable, TransactionTiming};
pub use transport::{Inbound, RemoteEnd, Transport};
