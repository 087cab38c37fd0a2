//! Boundary with the game engine and the application

use head_codec::GameState;
use head_types::{PeerIndex, TxId};
use tokio::sync::mpsc;

/// Receives packets addressed to this participant
pub trait GameEngine: Send {
    /// `data` is borrowed for the duration of the call only
    fn receive_packet(&mut self, from: PeerIndex, data: &[u8]);
}

/// Application callbacks; every method defaults to a no-op
#[allow(unused_variables)]
pub trait LifecycleHooks: Send {
    fn on_new_game(
        &mut self,
        game_id: TxId,
        player_count: u64,
        bot_count: u64,
        first_ephemeral_key: Option<&[u8]>,
    ) {
    }

    fn on_player_join(&mut self, game_id: TxId, ephemeral_keys: &[Vec<u8>]) {}

    fn on_game_state(&mut self, game_id: TxId, state: GameState) {}

    /// Peers `a` and `b` report different kills within the window
    fn on_disagreement(&mut self, a: PeerIndex, b: PeerIndex) {}

    /// A unit this participant submitted was rejected
    fn on_tx_invalid(&mut self, tx_id: TxId) {}

    fn on_disconnect(&mut self) {}
}

/// Hooks that ignore everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl LifecycleHooks for NoHooks {}

/// Packet produced by the game engine, before the engine stamps it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub to: PeerIndex,
    pub from: PeerIndex,
    pub kills: Vec<i64>,
    pub data: Vec<u8>,
}

/// Handle the game engine sends packets through, once per frame
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::UnboundedSender<OutboundPacket>,
}

impl PacketSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<OutboundPacket>) -> Self {
        Self { tx }
    }

    /// Queue a packet; false once the engine is gone
    pub fn send_packet(&self, to: PeerIndex, from: PeerIndex, kills: &[i64], data: &[u8]) -> bool {
        self.send(OutboundPacket {
            to,
            from,
            kills: kills.to_vec(),
            data: data.to_vec(),
        })
    }

    pub fn send(&self, packet: OutboundPacket) -> bool {
        self.tx.send(packet).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
