//! Per-transaction latency bookkeeping

use std::collections::HashMap;
use std::time::{Duration, Instant};

use head_types::TxId;

/// Latencies are measured from the moment a transaction was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionTiming {
    pub sent_at: Instant,
    pub seen: Option<Duration>,
    pub invalid: Option<Duration>,
    pub confirmed: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Pruning starts above this many entries
    pub cap: usize,
    /// Pruning stops at this many entries
    pub target: usize,
    /// Only entries older than this are pruned
    pub retention: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cap: 10_000,
            target: 5_000,
            retention: Duration::from_secs(5),
        }
    }
}

/// Rolling averages over the table's current contents
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub sent: usize,
    pub seen: usize,
    pub confirmed: usize,
    pub invalid: usize,
    pub mean_seen: Option<Duration>,
    pub mean_confirmed: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct TimingTable {
    config: TimingConfig,
    entries: HashMap<TxId, TransactionTiming>,
}

impl TimingTable {
    pub fn new(config: TimingConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    pub fn record_sent(&mut self, tx_id: TxId, now: Instant) {
        self.entries.insert(
            tx_id,
            TransactionTiming {
                sent_at: now,
                seen: None,
                invalid: None,
                confirmed: None,
            },
        );
    }

    /// Returns the latency when `tx_id` was sent by this table's owner
    pub fn record_seen(&mut self, tx_id: &TxId, now: Instant) -> Option<Duration> {
        let t = self.entries.get_mut(tx_id)?;
        let latency = now.saturating_duration_since(t.sent_at);
        t.seen = Some(latency);
        Some(latency)
    }

    pub fn record_invalid(&mut self, tx_id: &TxId, now: Instant) -> Option<Duration> {
        let t = self.entries.get_mut(tx_id)?;
        let latency = now.saturating_duration_since(t.sent_at);
        t.invalid = Some(latency);
        Some(latency)
    }

    pub fn record_confirmed(&mut self, tx_id: &TxId, now: Instant) -> Option<Duration> {
        let t = self.entries.get_mut(tx_id)?;
        let latency = now.saturating_duration_since(t.sent_at);
        t.confirmed = Some(latency);
        Some(latency)
    }

    pub fn get(&self, tx_id: &TxId) -> Option<&TransactionTiming> {
        self.entries.get(tx_id)
    }

    pub fn confirmed(&self, tx_id: &TxId) -> Option<Duration> {
        self.entries.get(tx_id)?.confirmed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound memory: above `cap`, drop the oldest entries past the
    /// retention window until at most `target` remain
    pub fn prune(&mut self, now: Instant) -> usize {
        if self.entries.len() <= self.config.cap {
            return 0;
        }
        let mut stale: Vec<(Instant, TxId)> = self
            .entries
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.sent_at) > self.config.retention)
            .map(|(id, t)| (t.sent_at, *id))
            .collect();
        stale.sort();

        let mut removed = 0;
        for (_, id) in stale {
            if self.entries.len() <= self.config.target {
                break;
            }
            self.entries.remove(&id);
            removed += 1;
        }
        removed
    }

    pub fn summary(&self) -> LatencySummary {
        let mut s = LatencySummary {
            sent: self.entries.len(),
            ..Default::default()
        };
        let mut seen_total = Duration::ZERO;
        let mut confirmed_total = Duration::ZERO;
        for t in self.entries.values() {
            if let Some(d) = t.seen {
                s.seen += 1;
                seen_total += d;
            }
            if let Some(d) = t.confirmed {
                s.confirmed += 1;
                confirmed_total += d;
            }
            if t.invalid.is_some() {
                s.invalid += 1;
            }
        }
        if s.seen > 0 {
            s.mean_seen = Some(seen_total / s.seen as u32);
        }
        if s.confirmed > 0 {
            s.mean_confirmed = Some(confirmed_total / s.confirmed as u32);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> TxId {
        let mut b = [0u8; 32];
        b[..4].copy_from_slice(&n.to_be_bytes());
        TxId(b)
    }

    #[test]
    fn test_latencies_only_for_sent() {
        let mut t = TimingTable::default();
        let start = Instant::now();
        t.record_sent(id(1), start);
        assert_eq!(
            t.record_seen(&id(1), start + Duration::from_millis(20)),
            Some(Duration::from_millis(20))
        );
        assert_eq!(t.record_seen(&id(2), start), None);
        t.record_confirmed(&id(1), start + Duration::from_millis(90));
        assert_eq!(t.confirmed(&id(1)), Some(Duration::from_millis(90)));

        let s = t.summary();
        assert_eq!(s.sent, 1);
        assert_eq!(s.mean_seen, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_prune_keeps_recent_entries() {
        let mut t = TimingTable::new(TimingConfig {
            cap: 10,
            target: 5,
            retention: Duration::from_secs(5),
        });
        let start = Instant::now();
        for n in 0..8 {
            t.record_sent(id(n), start);
        }
        for n in 8..12 {
            t.record_sent(id(n), start + Duration::from_secs(10));
        }
        let now = start + Duration::from_secs(11);
        assert_eq!(t.prune(now), 7);
        assert_eq!(t.len(), 5);
        for n in 8..12 {
            assert!(t.get(&id(n)).is_some());
        }
    }

    #[test]
    fn test_prune_noop_under_cap() {
        let mut t = TimingTable::default();
        let start = Instant::now();
        t.record_sent(id(1), start);
        assert_eq!(t.prune(start + Duration::from_secs(60)), 0);
        assert_eq!(t.len(), 1);
    }
}
