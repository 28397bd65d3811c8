//! One consistency domain: an oplog plus the branch materialized at its heads.

use tracing::debug;

use crate::branch::Branch;
use crate::config::ReplicaConfig;
use crate::error::{Error, Result};
use crate::frontier::Frontier;
use crate::ids::{AgentId, LV};
use crate::ops::{OpContent, RemoteOp};
use crate::oplog::OpLog;
use crate::undo::Undoable;
use crate::version_vector::VersionVector;

/// A document replica. Every mutation takes `&mut self`; the branch always sits at the
/// oplog's heads between calls.
#[derive(Clone, Debug)]
pub struct Replica {
    config: ReplicaConfig,
    oplog: OpLog,
    branch: Branch,
}

impl Replica {
    pub fn new(config: ReplicaConfig) -> Self {
        let branch = Branch::with_chunk_capacity(config.index_chunk_capacity);
        Self {
            config,
            oplog: OpLog::new(),
            branch,
        }
    }

    pub fn with_agent(agent: &str) -> Self {
        Self::new(ReplicaConfig::new(agent))
    }

    /// Restore a replica from a persisted log (see [`OpLog::export_all`]).
    pub fn from_oplog(config: ReplicaConfig, oplog: OpLog) -> Result<Self> {
        let mut replica = Self::new(config);
        replica.branch.rebuild(&oplog, oplog.version())?;
        replica.oplog = oplog;
        Ok(replica)
    }

    pub fn agent(&self) -> &AgentId {
        &self.config.agent
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn oplog(&self) -> &OpLog {
        &self.oplog
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn frontier(&self) -> &Frontier {
        self.branch.frontier()
    }

    pub fn version_vector(&self) -> &VersionVector {
        self.oplog.graph().version_vector()
    }

    pub fn content(&self) -> String {
        self.branch.content()
    }

    pub fn len(&self) -> usize {
        self.branch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branch.is_empty()
    }

    /// Insert `text` at visible offset `pos`. Returns the new items' LVs.
    ///
    /// Each character is anchored on the one before it, so the run stays contiguous.
    pub fn insert(&mut self, pos: usize, text: &str) -> Result<Vec<LV>> {
        if pos > self.len() {
            return Err(Error::OutOfBounds {
                pos,
                len: self.len(),
            });
        }
        let (mut origin_left, origin_right) = self.branch.tree().insert_origins(pos)?;
        let next = self.oplog.len();
        let mut contents = Vec::with_capacity(text.len());
        for (i, c) in text.chars().enumerate() {
            contents.push(OpContent::Insert {
                content: c,
                origin_left,
                origin_right,
            });
            // The run is appended in order starting at `next`.
            origin_left = Some(next + i);
        }
        self.push_local_run(contents)
    }

    /// Delete `len` visible items starting at `pos`. Returns the delete ops' LVs.
    ///
    /// Fails with `OutOfBounds` (the requested `pos` and the document length) unless the whole
    /// range is visible; then nothing is emitted.
    pub fn delete(&mut self, pos: usize, len: usize) -> Result<Vec<LV>> {
        let end = match pos.checked_add(len) {
            Some(end) if end <= self.len() => end,
            _ => {
                return Err(Error::OutOfBounds {
                    pos,
                    len: self.len(),
                })
            }
        };
        let targets = (pos..end)
            .map(|p| self.branch.position_to_lv(p))
            .collect::<Result<Vec<_>>>()?;
        self.push_local_run(
            targets
                .into_iter()
                .map(|target| OpContent::Delete { target })
                .collect(),
        )
    }

    /// Emit a delete for the item created by insert `target`.
    pub fn delete_by_lv(&mut self, target: LV) -> Result<LV> {
        self.check_item(target)?;
        self.push_local(OpContent::Delete { target })
    }

    /// Emit an undelete for the item created by insert `target`.
    pub fn undelete_by_lv(&mut self, target: LV) -> Result<LV> {
        self.check_item(target)?;
        self.push_local(OpContent::Undelete { target })
    }

    /// Item an operation acts on.
    pub fn target_lv(&self, op: LV) -> Result<LV> {
        Ok(self.oplog.content(op)?.target(op))
    }

    pub fn lv_to_position(&self, item: LV) -> Result<Option<usize>> {
        self.branch.lv_to_position(item)
    }

    /// Validate, append and materialize a batch of remote operations, all or nothing.
    pub fn apply_remote_batch(&mut self, ops: Vec<RemoteOp>) -> Result<Vec<LV>> {
        let checkpoint = self.oplog.checkpoint();
        let lvs = self.oplog.apply_remote_batch(ops)?;
        if lvs.is_empty() {
            return Ok(lvs);
        }
        if let Err(err) = self.branch.merge(&self.oplog, &Frontier::from_unsorted(lvs.clone())) {
            self.oplog.rollback(checkpoint);
            debug!(error = %err, "remote batch rolled back");
            return Err(err);
        }
        Ok(lvs)
    }

    fn check_item(&self, target: LV) -> Result<()> {
        match self.oplog.content(target) {
            Ok(content) if content.is_insert() && self.branch.tree().contains(target) => Ok(()),
            _ => Err(Error::MissingItem(format!("no item for version {target}"))),
        }
    }

    fn push_local(&mut self, content: OpContent) -> Result<LV> {
        let lvs = self.push_local_run(vec![content])?;
        lvs.into_iter()
            .next()
            .ok_or_else(|| Error::InconsistentState("empty local push".into()))
    }

    /// Append a chain of local operations, each on top of the previous one, and merge them
    /// into the branch. All or nothing.
    fn push_local_run(&mut self, contents: Vec<OpContent>) -> Result<Vec<LV>> {
        if contents.is_empty() {
            return Ok(Vec::new());
        }
        let checkpoint = self.oplog.checkpoint();
        let mut parents = self.branch.frontier().clone();
        let mut lvs = Vec::with_capacity(contents.len());
        for content in contents {
            match self.oplog.push_local(&self.config.agent, &parents, content) {
                Ok(lv) => {
                    parents = Frontier::new_1(lv);
                    lvs.push(lv);
                }
                Err(err) => {
                    self.oplog.rollback(checkpoint);
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.branch.merge(&self.oplog, &parents) {
            self.oplog.rollback(checkpoint);
            debug!(error = %err, "local edit rolled back");
            return Err(err);
        }
        Ok(lvs)
    }
}

impl Undoable for Replica {
    fn target_lv(&self, op: LV) -> Result<LV> {
        Replica::target_lv(self, op)
    }

    fn lv_to_position(&self, item: LV) -> Result<Option<usize>> {
        Replica::lv_to_position(self, item)
    }

    fn delete_by_lv(&mut self, item: LV) -> Result<LV> {
        Replica::delete_by_lv(self, item)
    }

    fn undelete_by_lv(&mut self, item: LV) -> Result<LV> {
        Replica::undelete_by_lv(self, item)
    }
}
