//! A materialized document at one version of an oplog.
//!
//! A branch owns a Fugue tree plus the per-item delete marks, and moves between versions with
//! the walker. Moves are planned and validated before anything is touched; if applying a
//! validated plan still fails, the branch is rebuilt from scratch at the version it started
//! from, so callers always observe either the old or the new document.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::Result;
use crate::frontier::Frontier;
use crate::fugue::{FugueTree, Item};
use crate::ids::LV;
use crate::index::DEFAULT_CHUNK_CAPACITY;
use crate::ops::Operation;
use crate::oplog::OpLog;
use crate::walker::{self, Plan, WalkStats, Walker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchState {
    /// Tree, marks and frontier agree.
    Clean,
    /// A walk is being applied, or a failed walk could not be repaired by a rebuild.
    Advancing,
}

#[derive(Clone, Debug)]
pub struct Branch {
    tree: FugueTree,
    frontier: Frontier,
    /// Delete/undelete ops currently applied, per target item.
    marks: HashMap<LV, Vec<LV>>,
    state: BranchState,
    chunk_capacity: usize,
}

impl Default for Branch {
    fn default() -> Self {
        Self::new()
    }
}

impl Branch {
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    pub fn with_chunk_capacity(chunk_capacity: usize) -> Self {
        Self {
            tree: FugueTree::with_chunk_capacity(chunk_capacity),
            frontier: Frontier::root(),
            marks: HashMap::new(),
            state: BranchState::Clean,
            chunk_capacity,
        }
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn state(&self) -> BranchState {
        self.state
    }

    pub fn tree(&self) -> &FugueTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn content(&self) -> String {
        self.tree.content()
    }

    /// Visible items in document order.
    pub fn visible_items(&self) -> impl Iterator<Item = &Item> + Clone + '_ {
        self.tree.visible_items()
    }

    pub fn view(&self) -> DocumentView<'_> {
        DocumentView { branch: self }
    }

    /// Move to exactly `target` (which may be older than, newer than or concurrent with the
    /// current version) and return a view of the document there.
    pub fn checkout(&mut self, oplog: &OpLog, target: &Frontier) -> Result<DocumentView<'_>> {
        oplog.graph().check_frontier(target)?;
        let target = oplog.graph().dominators(target.as_slice())?;
        self.move_to(oplog, &target)?;
        Ok(self.view())
    }

    /// Move to the union of the current version and `other`. Returns the new frontier.
    pub fn merge(&mut self, oplog: &OpLog, other: &Frontier) -> Result<Frontier> {
        oplog.graph().check_frontier(other)?;
        let target = oplog.graph().merge_frontiers(&self.frontier, other)?;
        self.move_to(oplog, &target)?;
        Ok(target)
    }

    /// Discard the materialized state and replay the history of `target` from the root.
    pub fn rebuild(&mut self, oplog: &OpLog, target: &Frontier) -> Result<WalkStats> {
        oplog.graph().check_frontier(target)?;
        let target = oplog.graph().dominators(target.as_slice())?;
        self.rebuild_at(oplog, &target)
    }

    fn move_to(&mut self, oplog: &OpLog, target: &Frontier) -> Result<WalkStats> {
        if self.frontier == *target {
            return Ok(WalkStats::default());
        }
        let plan = walker::plan(oplog, &self.frontier, target)?;
        walker::validate(&plan, oplog, &self.tree)?;

        match self.apply(oplog, &plan) {
            Ok(stats) => {
                self.frontier = target.clone();
                self.state = BranchState::Clean;
                debug!(
                    retreated = stats.retreated,
                    advanced = stats.advanced,
                    frontier = ?self.frontier.as_slice(),
                    "branch moved"
                );
                Ok(stats)
            }
            Err(err) => {
                warn!(error = %err, "incremental walk failed; rebuilding branch");
                let original = self.frontier.clone();
                self.rebuild_at(oplog, &original)?;
                Err(err)
            }
        }
    }

    fn rebuild_at(&mut self, oplog: &OpLog, target: &Frontier) -> Result<WalkStats> {
        let plan = walker::plan(oplog, &Frontier::root(), target)?;
        let mut tree = FugueTree::with_chunk_capacity(self.chunk_capacity);
        walker::validate(&plan, oplog, &tree)?;

        let mut marks = HashMap::new();
        let stats = Walker {
            oplog,
            tree: &mut tree,
            marks: &mut marks,
        }
        .run(&plan)?;
        self.tree = tree;
        self.marks = marks;
        self.frontier = target.clone();
        self.state = BranchState::Clean;
        debug!(
            advanced = stats.advanced,
            items = self.tree.total_items(),
            "branch rebuilt"
        );
        Ok(stats)
    }

    fn apply(&mut self, oplog: &OpLog, plan: &Plan) -> Result<WalkStats> {
        self.state = BranchState::Advancing;
        Walker {
            oplog,
            tree: &mut self.tree,
            marks: &mut self.marks,
        }
        .run(plan)
    }

    pub fn position_to_lv(&self, pos: usize) -> Result<LV> {
        self.tree.position_to_lv(pos)
    }

    pub fn lv_to_position(&self, lv: LV) -> Result<Option<usize>> {
        self.tree.lv_to_position(lv)
    }
}

/// Operations reachable from `to` but not from `from`, in the order a walker would advance them.
pub fn diff_and_collect(oplog: &OpLog, from: &Frontier, to: &Frontier) -> Result<Vec<Operation>> {
    let plan = walker::plan(oplog, from, to)?;
    plan.advance.into_iter().map(|lv| oplog.get(lv)).collect()
}

/// Read-only view of a branch's document.
#[derive(Clone, Copy)]
pub struct DocumentView<'a> {
    branch: &'a Branch,
}

impl<'a> DocumentView<'a> {
    pub fn len(&self) -> usize {
        self.branch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branch.is_empty()
    }

    pub fn frontier(&self) -> &'a Frontier {
        &self.branch.frontier
    }

    pub fn chars(&self) -> impl Iterator<Item = char> + 'a {
        self.branch.tree.visible_items().map(|item| item.content)
    }

    pub fn items(&self) -> impl Iterator<Item = &'a Item> + 'a {
        self.branch.tree.visible_items()
    }

    pub fn position_to_lv(&self, pos: usize) -> Result<LV> {
        self.branch.position_to_lv(pos)
    }

    pub fn lv_to_position(&self, lv: LV) -> Result<Option<usize>> {
        self.branch.lv_to_position(lv)
    }
}

impl fmt::Display for DocumentView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use fmt::Write;
        self.chars().try_for_each(|c| f.write_char(c))
    }
}

impl fmt::Debug for DocumentView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentView")
            .field("frontier", &self.branch.frontier)
            .field("text", &self.to_string())
            .finish()
    }
}
