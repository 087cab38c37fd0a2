//! Head Multiplayer - a packet bus over a chain of head transactions
//!
//! Each participant appends one unit per flush to its own chain. Packets
//! from one sender arrive in send order; nothing orders packets across
//! senders, so cheat detection windows on each peer's own tic counter.
//!
//! - `engine`: queue, single-writer chain, event dispatch, run loop
//! - `lifecycle`: new game / join / state change detection
//! - `cheat`: pairwise kill report comparison (dedicated role)
//! - `hooks`: game engine and application callbacks

pub mod cheat;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod types;


pub use cheat::{CheatDetector, KillReport, DEFAULT_DISAGREEMENT_WINDOW};
pub use engine::{ProtocolEngine, ProtocolEngineBuilder};
pub use error::EngineError;
pub use hooks::{GameEngine, LifecycleHooks, NoHooks, OutboundPacket, PacketSender};
pub use lifecycle::{LifecycleEvent, LifecycleTracker, TrackedGame};
pub use types::{ChainPhase, EngineConfig, EngineExit, EngineStats, Role};

/// Frame rate of the game engine
pub const TICS_PER_SECOND: u64 = 35;
