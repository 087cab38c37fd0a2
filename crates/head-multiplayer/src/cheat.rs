//! Cross-peer kill tally comparison
//!
//! Every peer reports the kill vector it believes in with each packet. Two
//! peers whose reports are close in frame time (their own `tic` counters)
//! must agree; a disagreeing pair is escalated once, and may be escalated
//! again only after it has agreed in between.

use std::collections::{BTreeMap, HashSet};

use head_types::PeerIndex;

/// Default tolerance between two peers' tics
pub const DEFAULT_DISAGREEMENT_WINDOW: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillReport {
    pub tic: u64,
    pub kills: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct CheatDetector {
    window: u64,
    /// Reports from this peer are never compared (the referee itself)
    ignored: PeerIndex,
    reports: BTreeMap<PeerIndex, KillReport>,
    flagged: HashSet<(PeerIndex, PeerIndex)>,
}

impl CheatDetector {
    pub fn new(window: u64, ignored: PeerIndex) -> Self {
        Self {
            window,
            ignored,
            reports: BTreeMap::new(),
            flagged: HashSet::new(),
        }
    }

    /// Record a report and return pairs that newly disagree, lower index first
    pub fn record(&mut self, from: PeerIndex, tic: u64, kills: &[i64]) -> Vec<(PeerIndex, PeerIndex)> {
        if from == self.ignored {
            return Vec::new();
        }
        self.reports.insert(
            from,
            KillReport {
                tic,
                kills: kills.to_vec(),
            },
        );

        let mut fired = Vec::new();
        for (&other, report) in &self.reports {
            if other == from || report.tic.abs_diff(tic) > self.window {
                continue;
            }
            let pair = (from.min(other), from.max(other));
            if report.kills == kills {
                self.flagged.remove(&pair);
            } else if self.flagged.insert(pair) {
                fired.push(pair);
            }
        }
        fired
    }

    /// Latest kill vector reported by `peer`
    pub fn reported_kills(&self, peer: PeerIndex) -> Option<&[i64]> {
        self.reports.get(&peer).map(|r| r.kills.as_slice())
    }

    pub fn report(&self, peer: PeerIndex) -> Option<&KillReport> {
        self.reports.get(&peer)
    }

    pub fn is_flagged(&self, a: PeerIndex, b: PeerIndex) -> bool {
        self.flagged.contains(&(a.min(b), a.max(b)))
    }

    pub fn window(&self) -> u64 {
        self.window
    }
}
