//! Event-graph walker.
//!
//! Moving a branch from one version to another is a two phase walk over the causal graph:
//! operations only in the old version's history are *retreated* (newest first), then operations
//! only in the new version's history are *advanced* in a causal order. Retreating an insert
//! leaves its item in the tree as a placeholder, so later concurrent inserts still find their
//! origins and land where every other replica puts them.
//!
//! Deletes and undeletes are tracked as marks per target item. The item is hidden when every
//! causally maximal mark in the branch is a delete, so a delete racing an undelete loses.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::trace;

use crate::error::{Error, Result};
use crate::frontier::Frontier;
use crate::fugue::{FugueTree, ItemSpec};
use crate::ids::LV;
use crate::ops::OpContent;
use crate::oplog::OpLog;

/// Steps needed to move a branch between two versions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Descending LV order.
    pub retreat: Vec<LV>,
    /// Causal order; concurrent operations ordered by raw version.
    pub advance: Vec<LV>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.retreat.is_empty() && self.advance.is_empty()
    }
}

/// What a walk did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub retreated: usize,
    pub advanced: usize,
    /// Advanced inserts that created a new item (as opposed to re-inserting a placeholder).
    pub integrated: usize,
}

/// Plan the walk from `from` to `to`.
pub fn plan(oplog: &OpLog, from: &Frontier, to: &Frontier) -> Result<Plan> {
    let graph = oplog.graph();
    graph.check_frontier(from)?;
    graph.check_frontier(to)?;
    let diff = graph.diff(from, to)?;
    let mut retreat = diff.only_a;
    retreat.reverse();
    let advance = causal_order(oplog, &diff.only_b)?;
    Ok(Plan { retreat, advance })
}

/// Order `lvs` so every operation follows its ancestors in the set, picking the smallest raw
/// version among the ready operations at each step. The result depends only on the operations
/// themselves, not on local LV assignment, so every replica advances in the same order.
pub fn causal_order(oplog: &OpLog, lvs: &[LV]) -> Result<Vec<LV>> {
    let graph = oplog.graph();
    let members: HashSet<LV> = lvs.iter().copied().collect();
    let mut waiting: HashMap<LV, usize> = HashMap::new();
    let mut children: HashMap<LV, Vec<LV>> = HashMap::new();
    let mut ready = BinaryHeap::new();

    for &lv in lvs {
        let mut pending = 0;
        for parent in graph.parents(lv)?.iter() {
            if members.contains(&parent) {
                pending += 1;
                children.entry(parent).or_default().push(lv);
            }
        }
        if pending == 0 {
            ready.push(Reverse((graph.lv_to_raw(lv)?, lv)));
        } else {
            waiting.insert(lv, pending);
        }
    }

    let mut out = Vec::with_capacity(lvs.len());
    while let Some(Reverse((_, lv))) = ready.pop() {
        out.push(lv);
        for &child in children.get(&lv).map(Vec::as_slice).unwrap_or_default() {
            let Some(count) = waiting.get_mut(&child) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                waiting.remove(&child);
                ready.push(Reverse((graph.lv_to_raw(child)?, child)));
            }
        }
    }

    if out.len() != lvs.len() {
        return Err(Error::InconsistentState(format!(
            "causal order stalled after {} of {} operations",
            out.len(),
            lvs.len()
        )));
    }
    Ok(out)
}

/// Check a plan against the tree before anything is mutated.
///
/// Every origin and delete target must be an item that is part of the version being built:
/// inserted in the tree and not retreated by this plan, or inserted earlier in the plan.
pub fn validate(plan: &Plan, oplog: &OpLog, tree: &FugueTree) -> Result<()> {
    let mut retreated = HashSet::new();
    for &lv in &plan.retreat {
        if oplog.content(lv)?.is_insert() {
            if !tree.contains(lv) {
                return Err(Error::MissingItem(format!(
                    "cannot retreat insert {lv}: no such item"
                )));
            }
            retreated.insert(lv);
        }
    }

    let mut advanced = HashSet::new();
    let present = |lv: LV, advanced: &HashSet<LV>| {
        advanced.contains(&lv)
            || (!retreated.contains(&lv) && tree.get(lv).is_some_and(|item| item.inserted))
    };
    for &lv in &plan.advance {
        match oplog.content(lv)? {
            OpContent::Insert {
                origin_left,
                origin_right,
                ..
            } => {
                if let Some(origin) = origin_left
                    .into_iter()
                    .chain(origin_right)
                    .find(|&o| !present(o, &advanced))
                {
                    return Err(Error::MissingItem(format!(
                        "insert {lv} is anchored on {origin}, which is not in this version"
                    )));
                }
                advanced.insert(lv);
            }
            OpContent::Delete { target } | OpContent::Undelete { target } => {
                if !present(target, &advanced) {
                    return Err(Error::MissingItem(format!(
                        "operation {lv} targets {target}, which is not in this version"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Whether a set of delete/undelete marks on one item leaves it hidden.
pub(crate) fn hidden_by(oplog: &OpLog, marks: &[LV]) -> Result<bool> {
    let maximal = oplog.graph().dominators(marks)?;
    for mark in maximal.iter() {
        if !matches!(oplog.content(mark)?, OpContent::Delete { .. }) {
            return Ok(false);
        }
    }
    Ok(!maximal.is_empty())
}

/// Applies a validated plan to a branch's tree and marks.
pub(crate) struct Walker<'a> {
    pub oplog: &'a OpLog,
    pub tree: &'a mut FugueTree,
    pub marks: &'a mut HashMap<LV, Vec<LV>>,
}

impl Walker<'_> {
    pub fn run(&mut self, plan: &Plan) -> Result<WalkStats> {
        let mut stats = WalkStats::default();
        for &lv in &plan.retreat {
            self.retreat(lv)?;
            stats.retreated += 1;
        }
        for &lv in &plan.advance {
            if self.advance(lv)? {
                stats.integrated += 1;
            }
            stats.advanced += 1;
        }
        self.tree.flush();
        Ok(stats)
    }

    fn retreat(&mut self, lv: LV) -> Result<()> {
        trace!(lv, "retreat");
        match self.oplog.content(lv)? {
            OpContent::Insert { .. } => self.tree.set_inserted(lv, false),
            OpContent::Delete { target } | OpContent::Undelete { target } => {
                let now_empty = match self.marks.get_mut(&target) {
                    Some(marks) => {
                        marks.retain(|&m| m != lv);
                        marks.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.marks.remove(&target);
                }
                self.refresh(target)
            }
        }
    }

    /// Returns whether a new item was integrated.
    fn advance(&mut self, lv: LV) -> Result<bool> {
        trace!(lv, "advance");
        match self.oplog.content(lv)? {
            OpContent::Insert {
                content,
                origin_left,
                origin_right,
            } => {
                if self.tree.contains(lv) {
                    self.tree.set_inserted(lv, true)?;
                    self.refresh(lv)?;
                    return Ok(false);
                }
                self.tree.integrate(ItemSpec {
                    lv,
                    id: self.oplog.graph().lv_to_raw(lv)?,
                    content,
                    origin_left,
                    origin_right,
                })?;
                Ok(true)
            }
            OpContent::Delete { target } | OpContent::Undelete { target } => {
                self.marks.entry(target).or_default().push(lv);
                self.refresh(target)?;
                Ok(false)
            }
        }
    }

    fn refresh(&mut self, target: LV) -> Result<()> {
        let hidden = match self.marks.get(&target) {
            Some(marks) => hidden_by(self.oplog, marks)?,
            None => false,
        };
        self.tree.set_deleted(target, hidden)
    }
}
