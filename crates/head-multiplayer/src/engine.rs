//! Protocol engine
//!
//! Turns one participant's chain of units into a packet bus:
//! - outbound packets are queued and flushed as one batch per unit
//! - units seen on the channel are decoded and packets addressed to this
//!   participant are handed to the game engine
//! - confirmed game records drive the lifecycle hooks
//!
//! Single writer: the engine holds at most one spendable input at a time
//! (`latest`). It is selected from the mirror once, then replaced by each
//! submitted unit's own output, so two units can never spend the same input.

use std::collections::VecDeque;

use head_codec::{decode_payload, encode_packet_batch, Packet, Payload};
use head_session::{Session, SessionEvent};
use head_tx::{
    BuildError, BuilderConfig, BuiltUnit, ClientKeySet, DecodedTx, Destination, TxBuilder,
};
use head_types::{ChainUnit, PeerIndex, TxId, UnitRef};
use tokio::sync::mpsc;

use crate::cheat::CheatDetector;
use crate::error::EngineError;
use crate::hooks::{GameEngine, LifecycleHooks, NoHooks, OutboundPacket, PacketSender};
use crate::lifecycle::{LifecycleEvent, LifecycleTracker};
use crate::types::{ChainPhase, EngineConfig, EngineExit, EngineStats, Role};

/// Own units remembered until seen, confirmed or rejected
const MAX_UNRESOLVED: usize = 64;

pub struct ProtocolEngine {
    config: EngineConfig,
    role: Role,
    session: Session,
    builder: TxBuilder,
    game: Box<dyn GameEngine>,
    hooks: Box<dyn LifecycleHooks>,
    queue: Vec<Packet>,
    /// The next input of this participant's chain
    latest: Option<ChainUnit>,
    /// Input of a rejected unit, still live on the channel
    retry_input: Option<UnitRef>,
    unresolved: VecDeque<(TxId, UnitRef)>,
    phase: ChainPhase,
    tic: u64,
    lifecycle: LifecycleTracker,
    detector: Option<CheatDetector>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundPacket>,
    sender: Option<PacketSender>,
    stats: EngineStats,
}

impl ProtocolEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    pub fn latest_unit(&self) -> Option<&ChainUnit> {
        self.latest.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn tic(&self) -> u64 {
        self.tic
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    pub fn builder(&self) -> &TxBuilder {
        &self.builder
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Kills last reported by `peer` (dedicated role only)
    pub fn reported_kills(&self, peer: PeerIndex) -> Option<&[i64]> {
        self.detector.as_ref()?.reported_kills(peer)
    }

    /// Handle for the game engine; unavailable once `run` has started
    pub fn packet_sender(&self) -> Option<PacketSender> {
        self.sender.clone()
    }

    /// Address this participant's chain starts from
    pub fn input_address(&self) -> Option<&str> {
        match self.role {
            Role::Client { .. } => self.builder.address_of(Destination::AnyOf),
            Role::Server | Role::Dedicated => self.builder.address_of(Destination::SelfKey),
        }
    }

    fn destination(&self) -> Destination {
        match self.role {
            Role::Client { .. } if self.lifecycle.is_running() && self.builder.has_validator() => {
                Destination::Validator
            }
            Role::Client { .. } => Destination::AnyOf,
            Role::Server | Role::Dedicated => Destination::SelfKey,
        }
    }

    /// Queue a packet from the game engine, stamped with this session's key
    pub fn enqueue(&mut self, packet: OutboundPacket) {
        self.queue.push(Packet {
            to: packet.to,
            from: packet.from,
            ephemeral_key: self.builder.keys().key_hash().to_vec(),
            kills: packet.kills,
            data: packet.data,
        });
        if self.queue.len() == self.config.max_queue_warning + 1 {
            tracing::warn!("Packet queue holds {} packets", self.queue.len());
        }
    }

    /// Queue a packet and flush
    pub async fn send(&mut self, packet: OutboundPacket) -> Result<Option<TxId>, EngineError> {
        self.enqueue(packet);
        self.flush().await
    }

    /// Submit queued packets as one unit
    ///
    /// Returns `None` without error when there is nothing to send, the
    /// connection is closed, or no spendable input exists yet; the queue is
    /// kept for the next attempt. A queue too large for one transaction is
    /// sent oldest first in pieces that fit; the rest stays queued.
    pub async fn flush(&mut self) -> Result<Option<TxId>, EngineError> {
        if self.queue.is_empty() || !self.session.is_open() {
            return Ok(None);
        }
        let Some(input) = self.select_input().await else {
            tracing::debug!("No spendable input; {} packets stay queued", self.queue.len());
            return Ok(None);
        };

        let (built, count) = self.build_batch(&input)?;

        let previous = self.phase;
        self.phase = ChainPhase::Flushing;
        let tx_id = match self.session.submit(&built.bytes).await {
            Ok(tx_id) => tx_id,
            Err(e) => {
                self.phase = previous;
                tracing::warn!("Submit failed: {}", e);
                return Err(e.into());
            }
        };

        self.unresolved.push_back((tx_id, built.spent));
        if self.unresolved.len() > MAX_UNRESOLVED {
            self.unresolved.pop_front();
        }
        self.latest = Some(built.successor);
        self.stats.units_submitted += 1;
        self.stats.packets_sent += count as u64;
        tracing::trace!("Flushed {} packets at tic {} in {}", count, self.tic, tx_id);
        self.queue.drain(..count);
        self.tic += 1;
        self.phase = ChainPhase::AwaitingConfirmation { tx_id };
        Ok(Some(tx_id))
    }

    /// Flush until the queue is empty or a flush sends nothing
    async fn flush_queue(&mut self) {
        loop {
            match self.flush().await {
                Ok(Some(_)) if !self.queue.is_empty() => continue,
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("Flush failed: {}", e);
                    return;
                }
            }
        }
    }

    /// Build a unit from a queue prefix that fits, halving it on
    /// size errors. A single packet that never fits is dropped.
    fn build_batch(&mut self, input: &ChainUnit) -> Result<(BuiltUnit, usize), EngineError> {
        let destination = self.destination();
        let mut count = self.queue.len();
        loop {
            let payload = encode_packet_batch(&self.queue[..count], self.tic)?;
            match self.builder.build_unit(Some(input), &payload, destination) {
                Ok(built) => return Ok((built, count)),
                Err(BuildError::TxTooLarge { .. } | BuildError::PayloadTooLarge(_))
                    if count > 1 =>
                {
                    count /= 2;
                }
                Err(e @ (BuildError::TxTooLarge { .. } | BuildError::PayloadTooLarge(_))) => {
                    tracing::warn!("Dropping a packet that never fits: {}", e);
                    self.queue.remove(0);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The memoized input, or a fresh pick from the mirror
    async fn select_input(&mut self) -> Option<ChainUnit> {
        if let Some(unit) = &self.latest {
            return Some(unit.clone());
        }
        if let Some(retry) = self.retry_input.take() {
            if let Some(unit) = self.session.get_unit(&retry) {
                self.latest = Some(unit.clone());
                return self.latest.clone();
            }
        }

        let mut picked = self.pick_from_mirror();
        if picked.is_none() {
            // Failures are logged by the session
            let _ = self.session.refresh().await;
            picked = self.pick_from_mirror();
        }
        if let Some(unit) = &picked {
            tracing::debug!("Selected input {} at {}", unit.unit_ref, unit.owner_address);
        }
        self.latest = picked.clone();
        picked
    }

    fn pick_from_mirror(&self) -> Option<ChainUnit> {
        let address = self.input_address()?;
        let units = self.session.get_units(address);
        match self.role {
            // The lobby seed is the unit without a datum
            Role::Client { .. } => units.into_iter().find(|u| !u.has_payload()),
            // Skip the channel's funded seed and collateral
            Role::Server | Role::Dedicated => units.into_iter().find(|u| {
                !u.has_payload() && u.value.coin <= self.config.min_value && u.value.assets.is_empty()
            }),
        }
    }

    /// Apply one session event
    pub fn observe(&mut self, event: SessionEvent) -> Option<EngineExit> {
        match event {
            SessionEvent::Seen { tx_id, tx } => {
                self.resolve(tx_id);
                tx.and_then(|tx| self.deliver_packets(&tx))
            }
            SessionEvent::Confirmed { tx_id, tx } => {
                self.resolve(tx_id);
                if let Some(tx) = tx {
                    self.track_lifecycle(tx_id, &tx);
                }
                None
            }
            SessionEvent::Invalid { tx_id, own } => {
                self.on_invalid(tx_id, own);
                None
            }
            SessionEvent::Disconnected => {
                tracing::warn!("Coordinator disconnected");
                self.hooks.on_disconnect();
                Some(EngineExit::Disconnected)
            }
        }
    }

    fn resolve(&mut self, tx_id: TxId) {
        if self.phase == (ChainPhase::AwaitingConfirmation { tx_id }) {
            self.phase = ChainPhase::Idle;
        }
        self.unresolved.retain(|(id, _)| *id != tx_id);
    }

    fn on_invalid(&mut self, tx_id: TxId, own: bool) {
        if !own {
            tracing::debug!("Ignoring rejection of foreign unit {}", tx_id);
            return;
        }
        tracing::warn!("Own unit {} rejected; reselecting input", tx_id);

        let spent = self
            .unresolved
            .iter()
            .position(|(id, _)| *id == tx_id)
            .and_then(|i| self.unresolved.remove(i))
            .map(|(_, spent)| spent);
        // Anything chained on the rejected unit is lost with it
        self.latest = None;
        if let Some(spent) = spent.filter(|r| self.session.get_unit(r).is_some()) {
            self.retry_input = Some(spent);
        }
        if matches!(self.phase, ChainPhase::AwaitingConfirmation { .. }) {
            self.phase = ChainPhase::Idle;
        }
        self.stats.invalid_units += 1;
        self.hooks.on_tx_invalid(tx_id);
    }

    fn deliver_packets(&mut self, tx: &DecodedTx) -> Option<EngineExit> {
        let mut exit = None;
        for output in &tx.outputs {
            let Some(datum) = output.datum.as_deref() else {
                continue;
            };
            let Payload::Packets(batch) = decode_payload(datum) else {
                continue;
            };
            for packet in &batch.packets {
                if let Some(detector) = &mut self.detector {
                    for (a, b) in detector.record(packet.from, batch.tic, &packet.kills) {
                        tracing::warn!("Peers {} and {} disagree on kills", a, b);
                        self.hooks.on_disagreement(a, b);
                        if self.config.halt_on_disagreement && exit.is_none() {
                            exit = Some(EngineExit::Disagreement { a, b });
                        }
                    }
                }
                if packet.to == self.config.peer_index {
                    self.game.receive_packet(packet.from, &packet.data);
                    self.stats.packets_delivered += 1;
                }
            }
        }
        exit
    }

    fn track_lifecycle(&mut self, tx_id: TxId, tx: &DecodedTx) {
        for output in &tx.outputs {
            let Some(datum) = output.datum.as_deref() else {
                continue;
            };
            let Payload::Game(record) = decode_payload(datum) else {
                continue;
            };
            for event in self.lifecycle.observe(tx_id, &record) {
                self.dispatch_lifecycle(event);
            }
        }
    }

    fn dispatch_lifecycle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::NewGame {
                game_id,
                player_count,
                bot_count,
                first_ephemeral_key,
            } => {
                tracing::info!(
                    "New game {} ({} players, {} bots)",
                    game_id,
                    player_count,
                    bot_count
                );
                self.hooks.on_new_game(
                    game_id,
                    player_count,
                    bot_count,
                    first_ephemeral_key.as_deref(),
                );
            }
            LifecycleEvent::PlayerJoin {
                game_id,
                ephemeral_keys,
            } => {
                tracing::info!("Game {} now has {} players", game_id, ephemeral_keys.len());
                self.hooks.on_player_join(game_id, &ephemeral_keys);
            }
            LifecycleEvent::StateChanged { game_id, state } => {
                tracing::info!("Game {} is now {:?}", game_id, state);
                self.hooks.on_game_state(game_id, state);
            }
        }
    }

    /// Drive the engine until the connection drops or every sender is gone
    pub async fn run(&mut self) -> EngineExit {
        // Only handles given out before this point keep the channel open
        self.sender = None;
        let _ = self.session.refresh().await;

        loop {
            tokio::select! {
                event = self.session.next_event() => match event {
                    Some(event) => {
                        if let Some(exit) = self.observe(event) {
                            return exit;
                        }
                    }
                    None => return EngineExit::Disconnected,
                },
                packet = self.outbound_rx.recv() => match packet {
                    Some(packet) => {
                        self.enqueue(packet);
                        while let Ok(packet) = self.outbound_rx.try_recv() {
                            self.enqueue(packet);
                        }
                        self.flush_queue().await;
                    }
                    None => {
                        tracing::info!("All packet senders dropped");
                        return EngineExit::OutboundClosed;
                    }
                },
            }
        }
    }
}

/// Builder for ProtocolEngine
pub struct ProtocolEngineBuilder {
    config: EngineConfig,
    role: Role,
    builder_config: BuilderConfig,
    keys: Option<ClientKeySet>,
    session: Option<Session>,
    game: Option<Box<dyn GameEngine>>,
    hooks: Box<dyn LifecycleHooks>,
}

impl ProtocolEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            role: Role::Server,
            builder_config: BuilderConfig::default(),
            keys: None,
            session: None,
            game: None,
            hooks: Box::new(NoHooks),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn peer_index(mut self, index: PeerIndex) -> Self {
        self.config.peer_index = index;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn builder_config(mut self, config: BuilderConfig) -> Self {
        self.builder_config = config;
        self
    }

    pub fn keys(mut self, keys: ClientKeySet) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn game(mut self, game: impl GameEngine + 'static) -> Self {
        self.game = Some(Box::new(game));
        self
    }

    pub fn hooks(mut self, hooks: impl LifecycleHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn build(self) -> Result<ProtocolEngine, EngineError> {
        let keys = self.keys.ok_or(EngineError::Missing("keys"))?;
        let session = self.session.ok_or(EngineError::Missing("session"))?;
        let game = self.game.ok_or(EngineError::Missing("game engine"))?;

        let mut builder = TxBuilder::new(keys, self.builder_config);
        if let Role::Client {
            admin_key_hash,
            validator,
        } = &self.role
        {
            builder = builder.with_admin(*admin_key_hash);
            if let Some(validator) = validator {
                builder = builder.with_validator(validator.clone());
            }
        }
        let detector = matches!(self.role, Role::Dedicated).then(|| {
            CheatDetector::new(self.config.disagreement_window, self.config.peer_index)
        });
        let (tx, outbound_rx) = mpsc::unbounded_channel();

        tracing::info!(
            "Engine running as {} (peer {}) with key address {}",
            self.role.name(),
            self.config.peer_index,
            builder.address_of(Destination::SelfKey).unwrap_or_default()
        );

        Ok(ProtocolEngine {
            config: self.config,
            role: self.role,
            session,
            builder,
            game,
            hooks: self.hooks,
            queue: Vec::new(),
            latest: None,
            retry_input: None,
            unresolved: VecDeque::new(),
            phase: ChainPhase::Idle,
            tic: 0,
            lifecycle: LifecycleTracker::new(),
            detector,
            outbound_rx,
            sender: Some(PacketSender::new(tx)),
            stats: EngineStats::default(),
        })
    }
}

impl Default for ProtocolEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
