//! Causal graph over operations.
//!
//! Every operation gets a dense LV on arrival. Because an operation can only be registered once
//! all of its parents are, LV order is a topological order of the graph: every ancestor of `v`
//! has an LV smaller than `v`. All graph walks below rely on that and visit LVs from the highest
//! down using a max-heap.

use std::collections::{BTreeMap, BinaryHeap, HashMap};

use tracing::trace;

use crate::error::{Error, Result};
use crate::frontier::Frontier;
use crate::ids::{AgentId, RawVersion, LV};
use crate::version_vector::VersionVector;

/// Causal relationship between two frontiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CausalOrder {
    Equal,
    /// Every operation in the left frontier's history is in the right one's, and not vice versa.
    Before,
    After,
    Concurrent,
}

/// LVs reachable from exactly one of two frontiers, ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diff {
    pub only_a: Vec<LV>,
    pub only_b: Vec<LV>,
}

#[derive(Clone, Debug)]
struct GraphEntry {
    id: RawVersion,
    parents: Frontier,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Reach {
    OnlyA,
    OnlyB,
    Shared,
}

/// Saved graph size, restorable with [`CausalGraph::rollback`].
#[derive(Clone, Debug)]
pub(crate) struct Checkpoint {
    len: usize,
    heads: Frontier,
    known: VersionVector,
}

/// Arena of graph entries indexed by LV, plus per-agent lookup tables.
#[derive(Clone, Debug, Default)]
pub struct CausalGraph {
    entries: Vec<GraphEntry>,
    /// Per-agent `seq -> LV` tables.
    agents: HashMap<AgentId, BTreeMap<u64, LV>>,
    heads: Frontier,
    known: VersionVector,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Version of the whole graph.
    pub fn heads(&self) -> &Frontier {
        &self.heads
    }

    /// Exact summary of every known raw version.
    pub fn version_vector(&self) -> &VersionVector {
        &self.known
    }

    /// Next unused sequence number for `agent`.
    pub fn next_seq(&self, agent: &AgentId) -> u64 {
        self.agents
            .get(agent)
            .and_then(|seqs| seqs.keys().next_back())
            .map(|seq| seq + 1)
            .unwrap_or(0)
    }

    pub fn contains_raw(&self, id: &RawVersion) -> bool {
        self.try_raw_to_lv(id).is_some()
    }

    pub fn try_raw_to_lv(&self, id: &RawVersion) -> Option<LV> {
        self.agents
            .get(&id.agent)
            .and_then(|seqs| seqs.get(&id.seq))
            .copied()
    }

    pub fn raw_to_lv(&self, id: &RawVersion) -> Result<LV> {
        self.try_raw_to_lv(id)
            .ok_or_else(|| Error::MissingEntry(format!("unknown raw version {id}")))
    }

    pub fn lv_to_raw(&self, lv: LV) -> Result<RawVersion> {
        self.entries
            .get(lv)
            .map(|e| e.id.clone())
            .ok_or_else(|| Error::MissingEntry(format!("unknown version {lv}")))
    }

    pub fn parents(&self, lv: LV) -> Result<&Frontier> {
        self.entries
            .get(lv)
            .map(|e| &e.parents)
            .ok_or_else(|| Error::MissingEntry(format!("unknown version {lv}")))
    }

    /// Register an operation whose parents are given as raw versions.
    pub fn register(&mut self, id: RawVersion, parents: &[RawVersion]) -> Result<LV> {
        let parents = parents
            .iter()
            .map(|p| {
                self.try_raw_to_lv(p).ok_or_else(|| {
                    Error::MissingParent(format!("{id} depends on unknown {p}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.push(id, &parents)
    }

    /// Register an operation whose parents are local LVs. Returns the assigned LV.
    pub fn push(&mut self, id: RawVersion, parents: &[LV]) -> Result<LV> {
        if self.contains_raw(&id) {
            return Err(Error::DuplicateOperation(id.to_string()));
        }
        let lv = self.entries.len();
        if let Some(&missing) = parents.iter().find(|&&p| p >= lv) {
            return Err(Error::MissingParent(format!(
                "{id} depends on unknown version {missing}"
            )));
        }
        let parents = self.dominators(parents)?;

        trace!(%id, lv, parents = ?parents.as_slice(), "register op");
        self.agents
            .entry(id.agent.clone())
            .or_default()
            .insert(id.seq, lv);
        self.known.observe_raw(&id);
        self.heads.advance_by(&parents, lv);
        self.entries.push(GraphEntry { id, parents });
        Ok(lv)
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.entries.len(),
            heads: self.heads.clone(),
            known: self.known.clone(),
        }
    }

    /// Forget every entry registered after `checkpoint` was taken.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        if checkpoint.len >= self.entries.len() {
            return;
        }
        for entry in self.entries.drain(checkpoint.len..) {
            let now_empty = match self.agents.get_mut(&entry.id.agent) {
                Some(seqs) => {
                    seqs.remove(&entry.id.seq);
                    seqs.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.agents.remove(&entry.id.agent);
            }
        }
        self.heads = checkpoint.heads;
        self.known = checkpoint.known;
    }

    /// Whether `target` is in the history of `frontier` (inclusive).
    pub fn frontier_contains(&self, frontier: &Frontier, target: LV) -> Result<bool> {
        self.check_frontier(frontier)?;
        if frontier.contains(target) {
            return Ok(true);
        }
        let mut queue: BinaryHeap<LV> = frontier.iter().filter(|&v| v > target).collect();
        while let Some(lv) = queue.pop() {
            if lv == target {
                return Ok(true);
            }
            while queue.peek() == Some(&lv) {
                queue.pop();
            }
            for &p in self.parents(lv)?.as_slice() {
                if p >= target {
                    queue.push(p);
                }
            }
        }
        Ok(false)
    }

    /// Whether `a` is `b` or one of its ancestors.
    pub fn is_ancestor(&self, a: LV, b: LV) -> Result<bool> {
        Ok(a <= b && self.frontier_contains(&Frontier::new_1(b), a)?)
    }

    /// Reduce a set of LVs to the ones that are not ancestors of another element.
    ///
    /// Exact duplicates collapse into one entry; nothing else is dropped.
    pub fn dominators(&self, lvs: &[LV]) -> Result<Frontier> {
        if let Some(&lv) = lvs.iter().find(|&&lv| lv >= self.entries.len()) {
            return Err(Error::MissingEntry(format!("unknown version {lv}")));
        }
        match lvs {
            [] => return Ok(Frontier::root()),
            [lv] => return Ok(Frontier::new_1(*lv)),
            _ => {}
        }
        let min = lvs.iter().copied().min().unwrap_or_default();
        // (lv, is_input). At equal LV the input entry pops first; any further entry for the same
        // LV means it was also reached as an ancestor of something larger.
        let mut queue: BinaryHeap<(LV, bool)> = lvs.iter().map(|&lv| (lv, true)).collect();
        let mut inputs_left = lvs.len();
        let mut result = Vec::new();

        while let Some((lv, is_input)) = queue.pop() {
            let mut reached = !is_input;
            if is_input {
                inputs_left -= 1;
            }
            while let Some(&(next, next_input)) = queue.peek() {
                if next != lv {
                    break;
                }
                queue.pop();
                if next_input {
                    inputs_left -= 1;
                } else {
                    reached = true;
                }
            }
            if is_input && !reached {
                result.push(lv);
            }
            if inputs_left == 0 {
                break;
            }
            for &p in self.parents(lv)?.as_slice() {
                if p >= min {
                    queue.push((p, false));
                }
            }
        }

        result.reverse();
        Ok(Frontier::from_sorted(result))
    }

    /// Smallest frontier whose history covers both inputs.
    pub fn merge_frontiers(&self, a: &Frontier, b: &Frontier) -> Result<Frontier> {
        self.check_frontier(a)?;
        self.check_frontier(b)?;
        if a == b {
            return Ok(a.clone());
        }
        let mut all: Vec<LV> = a.iter().chain(b.iter()).collect();
        all.sort_unstable();
        all.dedup();
        self.dominators(&all)
    }

    /// Operations in the history of exactly one of `a` / `b`.
    pub fn diff(&self, a: &Frontier, b: &Frontier) -> Result<Diff> {
        self.check_frontier(a)?;
        self.check_frontier(b)?;
        if a == b {
            return Ok(Diff::default());
        }
        let mut queue: BinaryHeap<(LV, Reach)> = a
            .iter()
            .map(|lv| (lv, Reach::OnlyA))
            .chain(b.iter().map(|lv| (lv, Reach::OnlyB)))
            .collect();
        let mut num_shared = 0usize;
        let mut only_a = Vec::new();
        let mut only_b = Vec::new();

        while queue.len() > num_shared {
            let Some((lv, mut reach)) = queue.pop() else {
                break;
            };
            if reach == Reach::Shared {
                num_shared -= 1;
            }
            while let Some(&(next, next_reach)) = queue.peek() {
                if next != lv {
                    break;
                }
                queue.pop();
                if next_reach == Reach::Shared {
                    num_shared -= 1;
                }
                if next_reach != reach {
                    reach = Reach::Shared;
                }
            }
            match reach {
                Reach::OnlyA => only_a.push(lv),
                Reach::OnlyB => only_b.push(lv),
                Reach::Shared => {}
            }
            for &p in self.parents(lv)?.as_slice() {
                queue.push((p, reach));
                if reach == Reach::Shared {
                    num_shared += 1;
                }
            }
        }

        only_a.reverse();
        only_b.reverse();
        Ok(Diff { only_a, only_b })
    }

    /// Causal relationship between two frontiers.
    pub fn compare(&self, a: &Frontier, b: &Frontier) -> Result<CausalOrder> {
        let diff = self.diff(a, b)?;
        Ok(match (diff.only_a.is_empty(), diff.only_b.is_empty()) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (false, false) => CausalOrder::Concurrent,
        })
    }

    /// All operations not in the history of `since`, ascending (a valid topological order).
    pub fn versions_since(&self, since: &Frontier) -> Result<Vec<LV>> {
        if since.is_root() {
            return Ok((0..self.entries.len()).collect());
        }
        Ok(self.diff(&self.heads, since)?.only_a)
    }

    pub fn check_frontier(&self, frontier: &Frontier) -> Result<()> {
        match frontier.iter().find(|&lv| lv >= self.entries.len()) {
            Some(lv) => Err(Error::MissingEntry(format!("unknown version {lv}"))),
            None => Ok(()),
        }
    }

    pub fn local_to_remote_frontier(&self, frontier: &Frontier) -> Result<Vec<RawVersion>> {
        frontier.iter().map(|lv| self.lv_to_raw(lv)).collect()
    }

    pub fn remote_to_local_frontier(&self, raw: &[RawVersion]) -> Result<Frontier> {
        let lvs = raw
            .iter()
            .map(|id| self.raw_to_lv(id))
            .collect::<Result<Vec<_>>>()?;
        self.dominators(&lvs)
    }
}
