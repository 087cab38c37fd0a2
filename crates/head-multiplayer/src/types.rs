//! Engine configuration and state types

use head_tx::ValidatorRef;
use head_types::{KeyHash, PeerIndex, TxId};

use crate::cheat::DEFAULT_DISAGREEMENT_WINDOW;

/// Which participant this engine plays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A player: spends from the lobby multisig shared with the admin, and
    /// from the validator once a game is running (when one is configured)
    Client {
        admin_key_hash: KeyHash,
        validator: Option<ValidatorRef>,
    },
    /// Referee chaining units at its own key address
    Server,
    /// Referee that also cross-checks the players' kill reports
    Dedicated,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Client { .. } => "client",
            Role::Server => "server",
            Role::Dedicated => "dedicated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This participant's node number on the packet bus
    pub peer_index: PeerIndex,
    /// Maximum tic distance between two compared kill reports
    pub disagreement_window: u64,
    /// Referee inputs may hold at most this much coin
    pub min_value: u64,
    /// Queue length above which a warning is logged
    pub max_queue_warning: usize,
    /// Stop the run loop on the first disagreement
    pub halt_on_disagreement: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            peer_index: 0,
            disagreement_window: DEFAULT_DISAGREEMENT_WINDOW,
            min_value: 0,
            max_queue_warning: 256,
            halt_on_disagreement: false,
        }
    }
}

/// State of this participant's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainPhase {
    #[default]
    Idle,
    /// A unit is being built and submitted
    Flushing,
    /// The latest submitted unit has been neither seen nor confirmed
    AwaitingConfirmation { tx_id: TxId },
}

/// Why the run loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    Disconnected,
    /// Every packet sender was dropped
    OutboundClosed,
    Disagreement { a: PeerIndex, b: PeerIndex },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub units_submitted: u64,
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub invalid_units: u64,
}
