//! Local mirror of the head's unspent set
//!
//! Units arrive from two directions: pushed transactions and snapshot
//! refreshes. A refresh may have been taken before a spend this client
//! already knows about, so spent identities are tombstoned and refreshes
//! never re-add a tombstoned unit until it is released.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use head_tx::blake2b_256;
use head_types::{ChainUnit, TxId, UnitRef};

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    created_at: Instant,
    /// Transaction whose confirmation releases the tombstone
    spent_by: TxId,
}

#[derive(Debug, Default)]
pub struct UnitMirror {
    units: HashMap<UnitRef, ChainUnit>,
    tombstones: HashMap<UnitRef, Tombstone>,
}

impl UnitMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit_ref: &UnitRef) -> Option<&ChainUnit> {
        self.units.get(unit_ref)
    }

    pub fn contains(&self, unit_ref: &UnitRef) -> bool {
        self.units.contains_key(unit_ref)
    }

    pub fn is_tombstoned(&self, unit_ref: &UnitRef) -> bool {
        self.tombstones.contains_key(unit_ref)
    }

    /// Add a unit unless it is tombstoned. Returns whether it was added.
    pub fn insert(&mut self, unit: ChainUnit) -> bool {
        if self.tombstones.contains_key(&unit.unit_ref) {
            return false;
        }
        self.units.insert(unit.unit_ref, unit);
        true
    }

    /// Record that `spent_by` consumes `unit_ref`
    ///
    /// A unit still in the mirror is removed. A unit not yet seen is
    /// tombstoned so a later push or refresh cannot add it.
    pub fn spend(&mut self, unit_ref: UnitRef, spent_by: TxId, now: Instant) -> Option<ChainUnit> {
        let removed = self.units.remove(&unit_ref);
        if removed.is_none() {
            self.tombstone(unit_ref, spent_by, now);
        }
        removed
    }

    /// Remove and tombstone a unit this client is about to consume
    pub fn spend_locally(
        &mut self,
        unit_ref: UnitRef,
        spent_by: TxId,
        now: Instant,
    ) -> Option<ChainUnit> {
        self.tombstone(unit_ref, spent_by, now);
        self.units.remove(&unit_ref)
    }

    fn tombstone(&mut self, unit_ref: UnitRef, spent_by: TxId, now: Instant) {
        self.tombstones.insert(
            unit_ref,
            Tombstone {
                created_at: now,
                spent_by,
            },
        );
    }

    /// Release every tombstone created by `tx_id`
    pub fn release_spent_by(&mut self, tx_id: &TxId) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, t| t.spent_by != *tx_id);
        before - self.tombstones.len()
    }

    /// Drop tombstones older than `ttl`
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.tombstones.len();
        self.tombstones
            .retain(|_, t| now.saturating_duration_since(t.created_at) < ttl);
        before - self.tombstones.len()
    }

    /// Merge snapshot units, skipping tombstoned identities
    pub fn merge(&mut self, units: impl IntoIterator<Item = ChainUnit>) -> usize {
        let mut added = 0;
        for unit in units {
            if self.insert(unit) {
                added += 1;
            }
        }
        added
    }

    /// Units owned by `address`, ordered by identity
    pub fn units_at(&self, address: &str) -> Vec<ChainUnit> {
        let mut out: Vec<ChainUnit> = self
            .units
            .values()
            .filter(|u| u.owner_address == address)
            .cloned()
            .collect();
        out.sort_by_key(|u| u.unit_ref);
        out
    }

    /// Units at `address` holding a positive quantity of an asset
    pub fn units_with_asset(&self, address: &str, policy: &[u8], name: &[u8]) -> Vec<ChainUnit> {
        let mut out: Vec<ChainUnit> = self
            .units
            .values()
            .filter(|u| u.owner_address == address && u.value.quantity_of(policy, name) > 0)
            .cloned()
            .collect();
        out.sort_by_key(|u| u.unit_ref);
        out
    }

    /// Any unit holding an asset
    pub fn find_by_asset(&self, policy: &[u8], name: &[u8]) -> Option<&ChainUnit> {
        self.units
            .values()
            .filter(|u| u.value.quantity_of(policy, name) > 0)
            .min_by_key(|u| u.unit_ref)
    }

    /// Inline datum whose Blake2b-256 hash is `hash`
    pub fn datum_by_hash(&self, hash: &[u8]) -> Option<&[u8]> {
        self.units
            .values()
            .filter_map(|u| u.payload.as_deref())
            .find(|datum| blake2b_256(datum).as_slice() == hash)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }
}
