use std::collections::BTreeMap;

use crate::ids::{AgentId, RawVersion};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct AgentSeqs {
    /// Number of contiguous sequence numbers observed from zero (i.e. we've seen `0..contiguous`).
    contiguous: u64,
    /// Additional observed seqs beyond the contiguous prefix, as disjoint half-open ranges.
    ///
    /// Invariant: sorted by start, non-overlapping, non-adjacent, and every range has
    /// `start > contiguous`.
    ranges: Vec<(u64, u64)>,
}

impl AgentSeqs {
    fn next_unseen_max(&self) -> u64 {
        self.ranges
            .last()
            .map(|&(_, end)| end.max(self.contiguous))
            .unwrap_or(self.contiguous)
    }

    fn contains(&self, seq: u64) -> bool {
        if seq < self.contiguous {
            return true;
        }
        let idx = self.ranges.partition_point(|&(_, end)| end <= seq);
        self.ranges
            .get(idx)
            .map(|&(start, _)| start <= seq)
            .unwrap_or(false)
    }

    fn observe(&mut self, seq: u64) {
        self.insert_range(seq, seq + 1);
    }

    fn insert_range(&mut self, start: u64, end: u64) {
        if start >= end || end <= self.contiguous {
            return;
        }
        let start = start.max(self.contiguous);
        if start == self.contiguous {
            self.contiguous = end;
            self.absorb_ranges();
            return;
        }

        // Find every range touching [start, end] and fuse them into one.
        let first = self.ranges.partition_point(|&(_, e)| e < start);
        let mut last = first;
        let mut merged = (start, end);
        while last < self.ranges.len() && self.ranges[last].0 <= end {
            merged.0 = merged.0.min(self.ranges[last].0);
            merged.1 = merged.1.max(self.ranges[last].1);
            last += 1;
        }
        self.ranges.splice(first..last, std::iter::once(merged));
    }

    fn absorb_ranges(&mut self) {
        while let Some(&(start, end)) = self.ranges.first() {
            if start > self.contiguous {
                break;
            }
            self.contiguous = self.contiguous.max(end);
            self.ranges.remove(0);
        }
    }

    fn is_superset_of(&self, other: &AgentSeqs) -> bool {
        if other.contiguous > 0 && !self.contains_range(0, other.contiguous) {
            return false;
        }
        other
            .ranges
            .iter()
            .all(|&(start, end)| self.contains_range(start, end))
    }

    fn contains_range(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        if end <= self.contiguous {
            return true;
        }
        if start < self.contiguous {
            // [contiguous, ..) would be needed, and `contiguous` itself is missing by definition.
            return false;
        }
        let idx = self.ranges.partition_point(|&(_, e)| e <= start);
        self.ranges
            .get(idx)
            .map(|&(s, e)| s <= start && e >= end)
            .unwrap_or(false)
    }

    fn union(&mut self, other: &AgentSeqs) {
        self.insert_range(0, other.contiguous);
        for &(start, end) in &other.ranges {
            self.insert_range(start, end);
        }
    }
}

/// Gap-aware version vector keyed by agent, summarising exactly which raw versions are known.
///
/// Used by sync to compute the precise set of operations a peer is missing, independently of
/// the (replica-local) LV numbering.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VersionVector {
    entries: BTreeMap<AgentId, AgentSeqs>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, agent: &AgentId, seq: u64) {
        self.entries.entry(agent.clone()).or_default().observe(seq);
    }

    pub fn observe_raw(&mut self, raw: &RawVersion) {
        self.observe(&raw.agent, raw.seq);
    }

    pub fn contains(&self, raw: &RawVersion) -> bool {
        self.entries
            .get(&raw.agent)
            .map(|seqs| seqs.contains(raw.seq))
            .unwrap_or(false)
    }

    pub fn merge(&mut self, other: &VersionVector) {
        for (agent, seqs) in &other.entries {
            self.entries.entry(agent.clone()).or_default().union(seqs);
        }
    }

    pub fn is_aware_of(&self, other: &VersionVector) -> bool {
        other.entries.iter().all(|(agent, theirs)| match self.entries.get(agent) {
            Some(ours) => ours.is_superset_of(theirs),
            None => theirs.contiguous == 0 && theirs.ranges.is_empty(),
        })
    }

    /// One past the highest seq observed for `agent`, or 0 if none.
    ///
    /// Note: this ignores holes; use [`VersionVector::contiguous`] for gap-aware semantics.
    pub fn next_seq(&self, agent: &AgentId) -> u64 {
        self.entries
            .get(agent)
            .map(|seqs| seqs.next_unseen_max())
            .unwrap_or(0)
    }

    /// Number of contiguous seqs observed from zero for `agent`.
    pub fn contiguous(&self, agent: &AgentId) -> u64 {
        self.entries
            .get(agent)
            .map(|seqs| seqs.contiguous)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_observation_fills_holes() {
        let agent = AgentId::from("r");
        let mut vv = VersionVector::new();
        vv.observe(&agent, 2);
        vv.observe(&agent, 4);
        assert_eq!(vv.contiguous(&agent), 0);
        assert_eq!(vv.next_seq(&agent), 5);
        vv.observe(&agent, 0);
        vv.observe(&agent, 1);
        assert_eq!(vv.contiguous(&agent), 3);
        vv.observe(&agent, 3);
        assert_eq!(vv.contiguous(&agent), 5);
        assert!(vv.contains(&RawVersion::new(&agent, 4)));
        assert!(!vv.contains(&RawVersion::new(&agent, 5)));
    }

    #[test]
    fn union_keeps_ranges_disjoint() {
        let agent = AgentId::from("r");
        let mut a = VersionVector::new();
        let mut b = VersionVector::new();
        a.observe(&agent, 3);
        b.observe(&agent, 4);
        b.observe(&agent, 7);
        a.merge(&b);
        assert!(a.contains(&RawVersion::new(&agent, 3)));
        assert!(a.contains(&RawVersion::new(&agent, 4)));
        assert!(a.contains(&RawVersion::new(&agent, 7)));
        assert!(!a.contains(&RawVersion::new(&agent, 5)));
        assert!(a.is_aware_of(&b));
        assert!(!b.is_aware_of(&a));
    }
}
