//! Session with one head coordinator
//!
//! A `Session` owns the websocket transport, the unit mirror, the timing
//! table and the snapshot source. It is driven from a single task: inbound
//! frames are only processed inside `next_event`, `await_unit` and
//! `await_confirmed`, so no other code can observe the mirror half-updated.
//!
//! Per submitted unit: `Sent -> Seen -> Confirmed` or `Sent -> Invalid`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use head_tx::DecodedTx;
use head_types::{ChainUnit, TxId, UnitRef};
use reqwest::Url;

use crate::error::SessionError;
use crate::message::{ClientMessage, CoordinatorMessage, SnapshotSummary, DEFAULT_ERA};
use crate::mirror::UnitMirror;
use crate::snapshot::{HttpSnapshotSource, SnapshotSource};
use crate::timing::{TimingConfig, TimingTable};
use crate::transport::{Inbound, Transport};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Coordinator base URL; `http(s)` and `ws(s)` are both accepted
    pub node_url: String,
    /// Only stream transactions touching this address
    pub address_filter: Option<String>,
    /// Era tag on submitted transactions
    pub era: String,
    pub timing: TimingConfig,
    /// Tombstones not released within this window are dropped
    pub tombstone_ttl: Duration,
    /// How often tombstones and cached bodies are swept
    pub sweep_interval: Duration,
    pub snapshot_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:4001".to_string(),
            address_filter: None,
            era: DEFAULT_ERA.to_string(),
            timing: TimingConfig::default(),
            tombstone_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            snapshot_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Accepted into the coordinator's working set. Not durable.
    Seen { tx_id: TxId, tx: Option<DecodedTx> },
    /// Included in a confirmed snapshot
    Confirmed { tx_id: TxId, tx: Option<DecodedTx> },
    /// Rejected; `own` when this session submitted it
    Invalid { tx_id: TxId, own: bool },
    /// The connection is gone; emitted once
    Disconnected,
}

/// A submitted unit not yet confirmed or rejected
#[derive(Debug)]
struct InFlight {
    sent_at: Instant,
    /// Mirror entries removed at submission, restored on rejection
    spent: Vec<ChainUnit>,
}

pub struct Session {
    config: SessionConfig,
    transport: Transport,
    snapshot: Arc<dyn SnapshotSource>,
    mirror: UnitMirror,
    timings: TimingTable,
    in_flight: HashMap<TxId, InFlight>,
    /// Bodies seen but not yet confirmed
    pending: HashMap<TxId, (Instant, DecodedTx)>,
    /// Ids already reported as seen; repeats are dropped
    seen: HashMap<TxId, Instant>,
    events: VecDeque<SessionEvent>,
    open: bool,
    last_sweep: Instant,
}

impl Session {
    /// Connect to the coordinator named in `config`
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        let ws_url = websocket_url(&config.node_url, config.address_filter.as_deref())?;
        let http_base = http_url(&config.node_url)?;
        let snapshot = HttpSnapshotSource::new(&http_base, config.snapshot_timeout)?;
        let transport = Transport::connect(&ws_url).await?;
        Ok(Self::from_parts(config, transport, Arc::new(snapshot)))
    }

    pub fn from_parts(
        config: SessionConfig,
        transport: Transport,
        snapshot: Arc<dyn SnapshotSource>,
    ) -> Self {
        let timings = TimingTable::new(config.timing);
        Self {
            config,
            transport,
            snapshot,
            mirror: UnitMirror::new(),
            timings,
            in_flight: HashMap::new(),
            pending: HashMap::new(),
            seen: HashMap::new(),
            events: VecDeque::new(),
            open: true,
            last_sweep: Instant::now(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn mirror(&self) -> &UnitMirror {
        &self.mirror
    }

    pub fn timings(&self) -> &TimingTable {
        &self.timings
    }

    /// Next session event; `None` after `Disconnected` has been returned
    ///
    /// Cancel safe: an unfinished call loses no frame.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if !self.open {
                return None;
            }
            match self.transport.recv().await {
                Some(Inbound::Text(text)) => self.handle_message(&text, Instant::now()),
                Some(Inbound::Closed) | None => self.mark_closed(),
            }
        }
    }

    /// Submit signed transaction bytes
    ///
    /// The inputs are removed from the mirror and tombstoned until the
    /// coordinator confirms or rejects the transaction.
    pub async fn submit(&mut self, signed: &[u8]) -> Result<TxId, SessionError> {
        if !self.open {
            return Err(SessionError::Closed);
        }
        let tx = DecodedTx::from_cbor(signed)?;
        let msg = ClientMessage::new_tx(&self.config.era, hex::encode(signed)).to_json()?;
        self.transport.send(msg).await?;

        let now = Instant::now();
        let spent = tx
            .inputs
            .iter()
            .filter_map(|input| self.mirror.spend_locally(*input, tx.id, now))
            .collect();
        self.in_flight.insert(tx.id, InFlight { sent_at: now, spent });
        self.timings.record_sent(tx.id, now);

        tracing::trace!("Submitted {} ({} bytes)", tx.id, signed.len());
        Ok(tx.id)
    }

    /// Merge the coordinator's current unspent set into the mirror
    ///
    /// Failures are logged here; callers may ignore them and retry later.
    pub async fn refresh(&mut self) -> Result<usize, SessionError> {
        let units = match self.snapshot.fetch().await {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!("Snapshot refresh failed: {}", e);
                return Err(e);
            }
        };
        let total = units.len();
        let added = self.mirror.merge(units);
        tracing::debug!("Snapshot refresh: {} units, {} added", total, added);
        Ok(added)
    }

    pub fn get_units(&self, address: &str) -> Vec<ChainUnit> {
        self.mirror.units_at(address)
    }

    pub fn get_unit(&self, unit_ref: &UnitRef) -> Option<&ChainUnit> {
        self.mirror.get(unit_ref)
    }

    pub fn units_with_asset(&self, address: &str, policy: &[u8], name: &[u8]) -> Vec<ChainUnit> {
        self.mirror.units_with_asset(address, policy, name)
    }

    pub fn find_by_asset(&self, policy: &[u8], name: &[u8]) -> Option<&ChainUnit> {
        self.mirror.find_by_asset(policy, name)
    }

    pub fn datum_by_hash(&self, hash: &[u8]) -> Option<&[u8]> {
        self.mirror.datum_by_hash(hash)
    }

    /// Wait until `unit_ref` is in the mirror, refreshing with backoff
    pub async fn await_unit(
        &mut self,
        unit_ref: UnitRef,
        timeout: Duration,
    ) -> Result<ChainUnit, SessionError> {
        let deadline = Instant::now() + timeout;
        let mut delay = self.config.backoff_initial;
        loop {
            self.drain_buffered();
            if let Some(unit) = self.mirror.get(&unit_ref) {
                return Ok(unit.clone());
            }
            // Logged inside
            let _ = self.refresh().await;
            if let Some(unit) = self.mirror.get(&unit_ref) {
                return Ok(unit.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout(unit_ref.to_string()));
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(self.config.backoff_max);
        }
    }

    /// Wait for a unit submitted by this session to be confirmed
    ///
    /// Returns the confirmation latency. Events seen meanwhile stay queued
    /// for `next_event`.
    pub async fn await_confirmed(
        &mut self,
        tx_id: TxId,
        timeout: Duration,
    ) -> Result<Duration, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(timing) = self.timings.get(&tx_id) {
                if let Some(latency) = timing.confirmed {
                    return Ok(latency);
                }
                if timing.invalid.is_some() {
                    return Err(SessionError::Rejected(tx_id.to_string()));
                }
            }
            if !self.open {
                return Err(SessionError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.transport.recv()).await {
                Ok(Some(Inbound::Text(text))) => self.handle_message(&text, Instant::now()),
                Ok(Some(Inbound::Closed)) | Ok(None) => self.mark_closed(),
                Err(_) => return Err(SessionError::Timeout(tx_id.to_string())),
            }
        }
    }

    /// Process frames that have already arrived without waiting
    fn drain_buffered(&mut self) {
        while let Some(inbound) = self.transport.try_recv() {
            match inbound {
                Inbound::Text(text) => self.handle_message(&text, Instant::now()),
                Inbound::Closed => {
                    self.mark_closed();
                    break;
                }
            }
        }
    }

    fn mark_closed(&mut self) {
        if self.open {
            self.open = false;
            tracing::info!("Coordinator connection closed");
            self.events.push_back(SessionEvent::Disconnected);
        }
    }

    /// Apply one coordinator message, queueing the resulting event
    pub fn handle_message(&mut self, text: &str, now: Instant) {
        let msg = match CoordinatorMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Ignoring unparseable message: {}", e);
                return;
            }
        };
        tracing::trace!("Dispatching {}", msg.tag());

        match &msg {
            CoordinatorMessage::TxValid { transaction, .. } => {
                let cbor = transaction.as_ref().map(|t| t.cbor_hex.as_str());
                self.on_tx_valid(msg.tx_id(), cbor, now);
            }
            CoordinatorMessage::TxInvalid {
                validation_error, ..
            } => self.on_tx_invalid(msg.tx_id(), validation_error.as_ref(), now),
            CoordinatorMessage::SnapshotConfirmed { snapshot } => {
                self.on_snapshot_confirmed(snapshot, now)
            }
            CoordinatorMessage::Greetings {} | CoordinatorMessage::Other => {}
        }

        self.housekeeping(now);
    }

    fn on_tx_valid(&mut self, id: Option<&str>, cbor_hex: Option<&str>, now: Instant) {
        let decoded = match cbor_hex.filter(|h| !h.is_empty()) {
            Some(hex) => match DecodedTx::from_hex(hex) {
                Ok(tx) => Some(tx),
                Err(e) => {
                    tracing::debug!("Undecodable TxValid body: {}", e);
                    None
                }
            },
            None => None,
        };
        let tx_id = match id
            .and_then(|s| TxId::from_hex(s).ok())
            .or_else(|| decoded.as_ref().map(|tx| tx.id))
        {
            Some(tx_id) => tx_id,
            None => {
                tracing::debug!("TxValid without a usable transaction id");
                return;
            }
        };

        if self.seen.insert(tx_id, now).is_some() {
            tracing::trace!("Duplicate TxValid for {}", tx_id);
            return;
        }
        if let Some(latency) = self.timings.record_seen(&tx_id, now) {
            tracing::debug!("Seen {} after {:?}", tx_id, latency);
        }
        if let Some(tx) = &decoded {
            for input in &tx.inputs {
                self.mirror.spend(*input, tx_id, now);
            }
            for unit in tx.chain_units() {
                self.mirror.insert(unit);
            }
            self.pending.insert(tx_id, (now, tx.clone()));
        }
        self.events.push_back(SessionEvent::Seen { tx_id, tx: decoded });
    }

    fn on_tx_invalid(&mut self, id: Option<&str>, reason: Option<&serde_json::Value>, now: Instant) {
        let Some(tx_id) = id.and_then(|s| TxId::from_hex(s).ok()) else {
            tracing::debug!("TxInvalid without a usable transaction id");
            return;
        };
        self.timings.record_invalid(&tx_id, now);
        self.pending.remove(&tx_id);

        let own = match self.in_flight.remove(&tx_id) {
            Some(in_flight) => {
                self.mirror.release_spent_by(&tx_id);
                for unit in in_flight.spent {
                    self.mirror.insert(unit);
                }
                tracing::warn!(
                    "Transaction {} rejected: {}",
                    tx_id,
                    reason.map(|r| r.to_string()).unwrap_or_default()
                );
                true
            }
            None => {
                tracing::debug!("TxInvalid for foreign transaction {}", tx_id);
                false
            }
        };
        self.events.push_back(SessionEvent::Invalid { tx_id, own });
    }

    fn on_snapshot_confirmed(&mut self, snapshot: &SnapshotSummary, now: Instant) {
        tracing::trace!(
            "Snapshot {:?} confirms {} transactions",
            snapshot.number,
            snapshot.confirmed.len()
        );
        for entry in &snapshot.confirmed {
            let Ok(tx_id) = TxId::from_hex(entry.tx_id()) else {
                tracing::debug!("Skipping malformed confirmed id {}", entry.tx_id());
                continue;
            };
            if let Some(latency) = self.timings.record_confirmed(&tx_id, now) {
                tracing::debug!("Confirmed {} after {:?}", tx_id, latency);
            }
            self.in_flight.remove(&tx_id);
            self.mirror.release_spent_by(&tx_id);
            let tx = self.pending.remove(&tx_id).map(|(_, tx)| tx);
            self.events.push_back(SessionEvent::Confirmed { tx_id, tx });
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        let pruned = self.timings.prune(now);
        if pruned > 0 {
            tracing::trace!("Pruned {} timing entries", pruned);
        }
        if now.saturating_duration_since(self.last_sweep) < self.config.sweep_interval {
            return;
        }
        self.last_sweep = now;
        let ttl = self.config.tombstone_ttl;
        let swept = self.mirror.sweep(now, ttl);
        if swept > 0 {
            tracing::debug!("Dropped {} expired tombstones", swept);
        }
        self.pending
            .retain(|_, (at, _)| now.saturating_duration_since(*at) < ttl);
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);
        self.in_flight
            .retain(|_, f| now.saturating_duration_since(f.sent_at) < ttl);
    }
}

/// Websocket URL for a coordinator base URL
pub fn websocket_url(base: &str, address: Option<&str>) -> Result<String, SessionError> {
    let mut url = with_scheme(base, "ws", "wss")?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(address) = address {
            query.append_pair("address", address);
        }
        query.append_pair("history", "no");
    }
    Ok(url.into())
}

/// HTTP base URL for a coordinator base URL
pub fn http_url(base: &str) -> Result<String, SessionError> {
    let url = with_scheme(base, "http", "https")?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn with_scheme(base: &str, plain: &str, secure: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(base).map_err(|e| SessionError::InvalidUrl(format!("{base}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => plain,
        "https" | "wss" => secure,
        other => return Err(SessionError::InvalidUrl(format!("{base}: scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| SessionError::InvalidUrl(base.to_string()))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshot;
    use crate::transport::RemoteEnd;
    use head_tx::{BuilderConfig, BuiltUnit, ClientKeySet, Destination, TxBuilder};
    use head_types::{Network, Value};
    use serde_json::json;

    struct Fixture {
        session: Session,
        remote: RemoteEnd,
        snapshot: Arc<MemorySnapshot>,
        builder: TxBuilder,
        seed: ChainUnit,
    }

    fn fixture() -> Fixture {
        let builder = TxBuilder::new(
            ClientKeySet::from_bytes(&[7; 32], Network::Testnet),
            BuilderConfig::default(),
        );
        let seed = ChainUnit {
            unit_ref: UnitRef::new(TxId([1; 32]), 0),
            owner_address: builder.address_of(Destination::SelfKey).unwrap().to_string(),
            value: Value::coin(0),
            payload: None,
            datum_hash: None,
        };
        let snapshot = Arc::new(MemorySnapshot::new(vec![seed.clone()]));
        let (transport, remote) = Transport::in_memory();
        let session = Session::from_parts(SessionConfig::default(), transport, snapshot.clone());
        Fixture {
            session,
            remote,
            snapshot,
            builder,
            seed,
        }
    }

    fn tx_valid(unit: &BuiltUnit) -> String {
        json!({
            "tag": "TxValid",
            "transaction": {
                "txId": unit.tx_id.to_hex(),
                "type": "Tx BabbageEra",
                "cborHex": unit.cbor_hex(),
            }
        })
        .to_string()
    }

    fn confirmed(ids: &[TxId]) -> String {
        let ids: Vec<String> = ids.iter().map(|id| id.to_hex()).collect();
        json!({
            "tag": "SnapshotConfirmed",
            "snapshot": {"snapshotNumber": 1, "confirmedTransactions": ids}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_submit_seen_confirmed() {
        let mut f = fixture();
        assert_eq!(f.session.refresh().await.unwrap(), 1);

        let built = f
            .builder
            .build_unit(Some(&f.seed), &[0xd8, 0x79, 0x80], Destination::SelfKey)
            .unwrap();
        let id = f.session.submit(&built.bytes).await.unwrap();
        assert_eq!(id, built.tx_id);

        let sent: serde_json::Value =
            serde_json::from_str(&f.remote.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(sent["tag"], "NewTx");
        assert_eq!(sent["transaction"]["cborHex"], built.cbor_hex());

        // A stale snapshot still lists the seed
        assert!(f.session.get_unit(&f.seed.unit_ref).is_none());
        assert_eq!(f.session.refresh().await.unwrap(), 0);
        assert!(f.session.get_unit(&f.seed.unit_ref).is_none());

        f.remote.push(tx_valid(&built)).await;
        match f.session.next_event().await {
            Some(SessionEvent::Seen { tx_id, tx }) => {
                assert_eq!(tx_id, built.tx_id);
                assert_eq!(tx.unwrap().inputs, vec![f.seed.unit_ref]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.session.get_unit(&built.successor.unit_ref), Some(&built.successor));
        assert!(f.session.timings().get(&id).unwrap().seen.is_some());

        f.remote.push(confirmed(&[id])).await;
        match f.session.next_event().await {
            Some(SessionEvent::Confirmed { tx_id, tx }) => {
                assert_eq!(tx_id, id);
                assert!(tx.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!f.session.mirror().is_tombstoned(&f.seed.unit_ref));
        assert!(f.session.timings().confirmed(&id).is_some());
    }

    #[tokio::test]
    async fn test_repeated_tx_valid_reported_once() {
        let mut f = fixture();
        f.session.refresh().await.unwrap();
        let built = f
            .builder
            .build_unit(Some(&f.seed), &[0x80], Destination::SelfKey)
            .unwrap();
        f.session.submit(&built.bytes).await.unwrap();

        f.remote.push(tx_valid(&built)).await;
        f.remote.push(tx_valid(&built)).await;
        f.remote.push(confirmed(&[built.tx_id])).await;

        assert!(matches!(
            f.session.next_event().await,
            Some(SessionEvent::Seen { tx_id, .. }) if tx_id == built.tx_id
        ));
        assert!(matches!(
            f.session.next_event().await,
            Some(SessionEvent::Confirmed { tx_id, tx: Some(_) }) if tx_id == built.tx_id
        ));
        assert_eq!(f.session.get_units(&f.seed.owner_address), vec![built.successor]);
    }

    #[tokio::test]
    async fn test_own_rejection_restores_input() {
        let mut f = fixture();
        f.session.refresh().await.unwrap();
        let built = f
            .builder
            .build_unit(Some(&f.seed), &[0x80], Destination::SelfKey)
            .unwrap();
        let id = f.session.submit(&built.bytes).await.unwrap();

        let msg = json!({"tag": "TxInvalid", "transaction": {"txId": id.to_hex(), "cborHex": ""}});
        f.remote.push(msg.to_string()).await;
        assert_eq!(
            f.session.next_event().await,
            Some(SessionEvent::Invalid { tx_id: id, own: true })
        );
        assert_eq!(f.session.get_unit(&f.seed.unit_ref), Some(&f.seed));
        assert!(matches!(
            f.session.await_confirmed(id, Duration::from_millis(10)).await,
            Err(SessionError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_rejection_changes_nothing() {
        let mut f = fixture();
        f.session.refresh().await.unwrap();
        let foreign = TxId([0xee; 32]);
        let msg = json!({"tag": "TxInvalid", "transactionId": foreign.to_hex()});
        f.remote.push(msg.to_string()).await;
        assert_eq!(
            f.session.next_event().await,
            Some(SessionEvent::Invalid { tx_id: foreign, own: false })
        );
        assert_eq!(f.session.mirror().len(), 1);
        assert_eq!(f.session.mirror().tombstone_count(), 0);
    }

    #[tokio::test]
    async fn test_foreign_spend_of_unknown_unit_blocks_refresh() {
        let mut f = fixture();
        // Another writer spends the seed before this session ever saw it
        let built = f
            .builder
            .build_unit(Some(&f.seed), &[0x80], Destination::SelfKey)
            .unwrap();
        f.remote.push(tx_valid(&built)).await;
        assert!(matches!(
            f.session.next_event().await,
            Some(SessionEvent::Seen { .. })
        ));
        assert_eq!(f.session.refresh().await.unwrap(), 0);
        assert!(f.session.get_unit(&f.seed.unit_ref).is_none());
        assert_eq!(f.session.get_units(&f.seed.owner_address), vec![built.successor]);
    }

    #[tokio::test]
    async fn test_disconnect_emitted_once() {
        let mut f = fixture();
        f.remote.push(r#"{"tag":"Greetings"}"#).await;
        f.remote.close().await;
        assert_eq!(f.session.next_event().await, Some(SessionEvent::Disconnected));
        assert_eq!(f.session.next_event().await, None);
        assert!(!f.session.is_open());
        assert!(matches!(
            f.session.submit(&[0x84]).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_await_unit() {
        let mut f = fixture();
        let found = f
            .session
            .await_unit(f.seed.unit_ref, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(found, f.seed);

        f.snapshot.set(Vec::new());
        let missing = UnitRef::new(TxId([2; 32]), 0);
        assert!(matches!(
            f.session.await_unit(missing, Duration::from_millis(30)).await,
            Err(SessionError::Timeout(_))
        ));
    }

    #[test]
    fn test_url_schemes() {
        assert_eq!(
            websocket_url("http://127.0.0.1:4001", Some("addr_test1abc")).unwrap(),
            "ws://127.0.0.1:4001/?address=addr_test1abc&history=no"
        );
        assert_eq!(
            websocket_url("wss://head.example", None).unwrap(),
            "wss://head.example/?history=no"
        );
        assert_eq!(http_url("ws://127.0.0.1:4001").unwrap(), "http://127.0.0.1:4001");
        assert!(websocket_url("ftp://x", None).is_err());
        assert!(http_url("not a url").is_err());
    }
}
