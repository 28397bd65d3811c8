use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use crate::causal_graph::{CausalGraph, Checkpoint};
use crate::error::{Error, Result};
use crate::frontier::Frontier;
use crate::ids::{AgentId, RawVersion, LV};
use crate::ops::{OpContent, Operation, RemoteContent, RemoteOp};

/// Append-only operation store indexed by LV. The system of record for every document state.
#[derive(Clone, Debug, Default)]
pub struct OpLog {
    graph: CausalGraph,
    contents: Vec<OpContent>,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log by replaying operations in append order.
    pub fn from_remote_ops(ops: Vec<RemoteOp>) -> Result<Self> {
        let mut oplog = Self::new();
        oplog.apply_remote_batch(ops)?;
        Ok(oplog)
    }

    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Frontier covering every operation in the log.
    pub fn version(&self) -> &Frontier {
        self.graph.heads()
    }

    pub fn content(&self, lv: LV) -> Result<OpContent> {
        self.contents
            .get(lv)
            .copied()
            .ok_or_else(|| Error::MissingEntry(format!("unknown version {lv}")))
    }

    pub fn get(&self, lv: LV) -> Result<Operation> {
        let content = self.content(lv)?;
        Ok(Operation {
            lv,
            id: self.graph.lv_to_raw(lv)?,
            parents: self.graph.parents(lv)?.clone(),
            content,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        (0..self.len()).filter_map(move |lv| self.get(lv).ok())
    }

    /// Append a locally generated operation for `agent` on top of `parents`.
    ///
    /// Every origin or target must be an insert in the history of `parents`.
    pub fn push_local(
        &mut self,
        agent: &AgentId,
        parents: &Frontier,
        content: OpContent,
    ) -> Result<LV> {
        self.graph.check_frontier(parents)?;
        let refs = match content {
            OpContent::Insert {
                origin_left,
                origin_right,
                ..
            } => [origin_left, origin_right],
            OpContent::Delete { target } | OpContent::Undelete { target } => [Some(target), None],
        };
        for lv in refs.into_iter().flatten() {
            self.check_insert_ref(lv)?;
            if !self.graph.frontier_contains(parents, lv)? {
                return Err(Error::MissingParent(format!(
                    "version {lv} is outside the history of {:?}",
                    parents.as_slice()
                )));
            }
        }
        let id = RawVersion::new(agent, self.graph.next_seq(agent));
        let lv = self.graph.push(id, parents.as_slice())?;
        self.contents.push(content);
        Ok(lv)
    }

    fn check_insert_ref(&self, lv: LV) -> Result<()> {
        match self.contents.get(lv) {
            None => Err(Error::MissingEntry(format!("unknown version {lv}"))),
            Some(content) if !content.is_insert() => {
                Err(Error::MissingItem(format!("version {lv} is not an insert")))
            }
            Some(_) => Ok(()),
        }
    }

    /// Append one remote operation. Equivalent to a batch of one.
    pub fn append(&mut self, op: RemoteOp) -> Result<LV> {
        let lvs = self.apply_remote_batch(vec![op])?;
        lvs.into_iter()
            .next()
            .ok_or_else(|| Error::InconsistentState("empty append".into()))
    }

    /// Validate and append a batch of remote operations.
    ///
    /// Either every operation is appended or none is. Parents and references may point at
    /// operations already in the log or earlier in the same batch, and every reference must be
    /// in the history of its operation's parents.
    pub fn apply_remote_batch(&mut self, ops: Vec<RemoteOp>) -> Result<Vec<LV>> {
        self.validate_batch(&ops)?;

        // Validation guarantees each step below succeeds.
        let mut lvs = Vec::with_capacity(ops.len());
        for op in ops {
            let content = self.resolve_content(&op.content)?;
            let lv = self.graph.register(op.id, &op.parents)?;
            self.contents.push(content);
            lvs.push(lv);
        }
        if !lvs.is_empty() {
            debug!(
                count = lvs.len(),
                log_len = self.len(),
                "committed remote batch"
            );
        }
        Ok(lvs)
    }

    /// Undo every append made since `checkpoint` was taken.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.graph.rollback(checkpoint);
        self.contents.truncate(self.graph.len());
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        self.graph.checkpoint()
    }

    /// Check that [`OpLog::apply_remote_batch`] would accept `ops`, without appending anything.
    pub fn validate_batch(&self, ops: &[RemoteOp]) -> Result<()> {
        // Ops earlier in the batch get keys continuing the LV sequence, so keys stay in
        // topological order across the log and the batch.
        let base = self.len();
        // raw version -> (key, whether it is an insert)
        let mut pending: HashMap<&RawVersion, (usize, bool)> = HashMap::with_capacity(ops.len());
        let mut pending_parents: Vec<Vec<usize>> = Vec::with_capacity(ops.len());
        for op in ops {
            if self.graph.contains_raw(&op.id) || pending.contains_key(&op.id) {
                return Err(Error::DuplicateOperation(op.id.to_string()));
            }
            let parents = op
                .parents
                .iter()
                .map(|parent| {
                    self.graph
                        .try_raw_to_lv(parent)
                        .or_else(|| pending.get(parent).map(|&(key, _)| key))
                        .ok_or_else(|| {
                            Error::MissingParent(format!("{} depends on unknown {parent}", op.id))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            for reference in op.content.references() {
                let (key, is_insert) = match self.graph.try_raw_to_lv(reference) {
                    Some(lv) => (lv, self.contents[lv].is_insert()),
                    None => *pending.get(reference).ok_or_else(|| {
                        Error::MissingEntry(format!("{} refers to unknown {reference}", op.id))
                    })?,
                };
                if !is_insert {
                    return Err(Error::MissingItem(format!(
                        "{} refers to {reference}, which is not an insert",
                        op.id
                    )));
                }
                if !self.reaches(&parents, key, base, &pending_parents)? {
                    return Err(Error::MissingParent(format!(
                        "{} refers to {reference}, which is outside its history",
                        op.id
                    )));
                }
            }
            let is_insert = matches!(op.content, RemoteContent::Insert { .. });
            pending.insert(&op.id, (base + pending_parents.len(), is_insert));
            pending_parents.push(parents);
        }
        Ok(())
    }

    /// Whether `target` is in the history of `parents`. Keys from `base` on name operations
    /// earlier in the batch under validation; their parents are in `pending`.
    fn reaches(
        &self,
        parents: &[usize],
        target: usize,
        base: usize,
        pending: &[Vec<usize>],
    ) -> Result<bool> {
        let mut queue: BinaryHeap<usize> =
            parents.iter().copied().filter(|&k| k >= target).collect();
        while let Some(key) = queue.pop() {
            if key == target {
                return Ok(true);
            }
            while queue.peek() == Some(&key) {
                queue.pop();
            }
            let next = match key.checked_sub(base) {
                Some(i) => pending
                    .get(i)
                    .map(Vec::as_slice)
                    .ok_or_else(|| Error::InconsistentState(format!("no batch entry {i}")))?,
                None => self.graph.parents(key)?.as_slice(),
            };
            queue.extend(next.iter().copied().filter(|&p| p >= target));
        }
        Ok(false)
    }

    fn resolve_content(&self, content: &RemoteContent) -> Result<OpContent> {
        let resolve = |raw: &Option<RawVersion>| -> Result<Option<LV>> {
            raw.as_ref().map(|r| self.graph.raw_to_lv(r)).transpose()
        };
        Ok(match content {
            RemoteContent::Insert {
                content,
                origin_left,
                origin_right,
            } => OpContent::Insert {
                content: *content,
                origin_left: resolve(origin_left)?,
                origin_right: resolve(origin_right)?,
            },
            RemoteContent::Delete { target } => OpContent::Delete {
                target: self.graph.raw_to_lv(target)?,
            },
            RemoteContent::Undelete { target } => OpContent::Undelete {
                target: self.graph.raw_to_lv(target)?,
            },
        })
    }

    /// Wire form of the operation at `lv`.
    pub fn to_remote(&self, lv: LV) -> Result<RemoteOp> {
        let raw = |v: LV| self.graph.lv_to_raw(v);
        let content = match self.content(lv)? {
            OpContent::Insert {
                content,
                origin_left,
                origin_right,
            } => RemoteContent::Insert {
                content,
                origin_left: origin_left.map(raw).transpose()?,
                origin_right: origin_right.map(raw).transpose()?,
            },
            OpContent::Delete { target } => RemoteContent::Delete {
                target: raw(target)?,
            },
            OpContent::Undelete { target } => RemoteContent::Undelete {
                target: raw(target)?,
            },
        };
        Ok(RemoteOp {
            id: raw(lv)?,
            parents: self.graph.local_to_remote_frontier(self.graph.parents(lv)?)?,
            content,
        })
    }

    /// Every operation not reachable from `since`, in causal order.
    pub fn ops_since(&self, since: &Frontier) -> Result<Vec<Operation>> {
        self.graph.check_frontier(since)?;
        self.graph
            .versions_since(since)?
            .into_iter()
            .map(|lv| self.get(lv))
            .collect()
    }

    /// Wire form of [`OpLog::ops_since`].
    pub fn remote_ops_since(&self, since: &Frontier) -> Result<Vec<RemoteOp>> {
        self.graph.check_frontier(since)?;
        self.graph
            .versions_since(since)?
            .into_iter()
            .map(|lv| self.to_remote(lv))
            .collect()
    }

    /// The whole log in append order; replaying it with [`OpLog::from_remote_ops`] yields an
    /// identical log.
    pub fn export_all(&self) -> Result<Vec<RemoteOp>> {
        (0..self.len()).map(|lv| self.to_remote(lv)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::from(name)
    }

    fn raw(name: &str, seq: u64) -> RawVersion {
        RawVersion::new(&agent(name), seq)
    }

    fn ins(
        name: &str,
        seq: u64,
        parents: Vec<RawVersion>,
        c: char,
        left: Option<RawVersion>,
    ) -> RemoteOp {
        RemoteOp::insert(&agent(name), seq, parents, c, left, None)
    }

    #[test]
    fn push_local_assigns_sequential_seqs() {
        let mut log = OpLog::new();
        let a = agent("a");
        let first = log
            .push_local(
                &a,
                &Frontier::root(),
                OpContent::Insert {
                    content: 'h',
                    origin_left: None,
                    origin_right: None,
                },
            )
            .unwrap();
        let second = log
            .push_local(
                &a,
                &Frontier::new_1(first),
                OpContent::Insert {
                    content: 'i',
                    origin_left: Some(first),
                    origin_right: None,
                },
            )
            .unwrap();
        assert_eq!((first, second), (0, 1));
        assert_eq!(log.get(1).unwrap().id, raw("a", 1));
        assert_eq!(log.version().as_slice(), &[1]);
    }

    #[test]
    fn push_local_rejects_delete_of_delete() {
        let mut log = OpLog::new();
        let a = agent("a");
        let ins = log
            .push_local(
                &a,
                &Frontier::root(),
                OpContent::Insert {
                    content: 'x',
                    origin_left: None,
                    origin_right: None,
                },
            )
            .unwrap();
        let del = log
            .push_local(&a, &Frontier::new_1(ins), OpContent::Delete { target: ins })
            .unwrap();
        let err = log
            .push_local(&a, &Frontier::new_1(del), OpContent::Delete { target: del })
            .unwrap_err();
        assert!(matches!(err, Error::MissingItem(_)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn batch_resolves_parents_within_batch() {
        let mut log = OpLog::new();
        let lvs = log
            .apply_remote_batch(vec![
                ins("a", 0, vec![], 'a', None),
                ins("a", 1, vec![raw("a", 0)], 'b', Some(raw("a", 0))),
            ])
            .unwrap();
        assert_eq!(lvs, vec![0, 1]);
        assert_eq!(
            log.content(1).unwrap(),
            OpContent::Insert {
                content: 'b',
                origin_left: Some(0),
                origin_right: None
            }
        );
    }

    #[test]
    fn batch_rejects_duplicates_atomically() {
        let mut log = OpLog::new();
        log.append(ins("a", 0, vec![], 'a', None)).unwrap();
        let err = log
            .apply_remote_batch(vec![
                ins("b", 0, vec![raw("a", 0)], 'x', Some(raw("a", 0))),
                ins("a", 0, vec![], 'a', None),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation(_)));
        assert_eq!(log.len(), 1);

        let err = log
            .apply_remote_batch(vec![
                ins("b", 0, vec![raw("a", 0)], 'x', None),
                ins("b", 0, vec![raw("a", 0)], 'x', None),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation(_)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn references_must_be_in_the_op_history() {
        let mut log = OpLog::new();
        log.append(ins("a", 0, vec![], 'a', None)).unwrap();

        let err = log
            .append(RemoteOp::delete(&agent("d"), 0, vec![], raw("a", 0)))
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent(_)));
        let err = log
            .apply_remote_batch(vec![
                ins("b", 0, vec![raw("a", 0)], 'b', Some(raw("a", 0))),
                ins("c", 0, vec![raw("a", 0)], 'c', Some(raw("b", 0))),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent(_)));
        assert_eq!(log.len(), 1);

        // Reachable through an earlier op of the same batch.
        log.apply_remote_batch(vec![
            ins("b", 0, vec![raw("a", 0)], 'b', Some(raw("a", 0))),
            ins("b", 1, vec![raw("b", 0)], 'c', None),
            RemoteOp::delete(&agent("c"), 0, vec![raw("b", 1)], raw("a", 0)),
        ])
        .unwrap();
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn push_local_rejects_reference_outside_parents() {
        let mut log = OpLog::new();
        log.append(ins("a", 0, vec![], 'a', None)).unwrap();
        log.append(ins("b", 0, vec![], 'b', None)).unwrap();
        let err = log
            .push_local(
                &agent("a"),
                &Frontier::new_1(0),
                OpContent::Insert {
                    content: 'x',
                    origin_left: Some(0),
                    origin_right: Some(1),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent(_)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn batch_rejects_forward_parent_reference() {
        let mut log = OpLog::new();
        let err = log
            .apply_remote_batch(vec![
                ins("a", 0, vec![], 'a', None),
                ins("a", 1, vec![raw("a", 2)], 'b', None),
                ins("a", 2, vec![raw("a", 0)], 'c', None),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent(_)));
        assert!(log.is_empty());
        assert!(log.version().is_root());
    }

    #[test]
    fn ops_since_returns_missing_suffix() {
        let mut log = OpLog::new();
        log.apply_remote_batch(vec![
            ins("a", 0, vec![], 'a', None),
            ins("a", 1, vec![raw("a", 0)], 'b', Some(raw("a", 0))),
            ins("b", 0, vec![raw("a", 0)], 'x', Some(raw("a", 0))),
        ])
        .unwrap();
        let since: Vec<_> = log
            .ops_since(&Frontier::new_1(1))
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(since, vec![raw("b", 0)]);
        assert_eq!(log.ops_since(&Frontier::root()).unwrap().len(), 3);
        assert!(matches!(
            log.ops_since(&Frontier::new_1(99)),
            Err(Error::MissingEntry(_))
        ));
    }

    #[test]
    fn export_all_replays_to_identical_log() {
        let mut log = OpLog::new();
        log.apply_remote_batch(vec![
            ins("a", 0, vec![], 'a', None),
            ins("b", 0, vec![], 'b', None),
            RemoteOp::delete(&agent("b"), 1, vec![raw("a", 0), raw("b", 0)], raw("a", 0)),
        ])
        .unwrap();
        let replayed = OpLog::from_remote_ops(log.export_all().unwrap()).unwrap();
        assert_eq!(replayed.export_all().unwrap(), log.export_all().unwrap());
        assert_eq!(replayed.version(), log.version());
    }
}
