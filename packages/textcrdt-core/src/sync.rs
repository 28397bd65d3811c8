//! Batch exchange between replicas.
//!
//! A round is: the sender exports what the receiver lacks ([`export_since`] when it knows the
//! receiver's frontier in its own LVs, [`export_missing`] when it only has the receiver's version
//! vector), the receiver [`SyncSession::apply`]s the batch. Sessions carry no state between rounds
//! beyond their deadline and cancel token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frontier::Frontier;
use crate::ids::{RawVersion, LV};
use crate::ops::RemoteOp;
use crate::replica::Replica;
use crate::version_vector::VersionVector;

/// Operations plus the sender's heads at export time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncBatch {
    /// In an order where every parent precedes its children.
    pub ops: Vec<RemoteOp>,
    pub heads: Vec<RawVersion>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Cooperative cancellation flag shared between a session and whoever may abort it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Local LVs assigned to the applied operations.
    pub applied: Vec<LV>,
    /// Whether every head the sender advertised is now known locally.
    pub heads_known: bool,
    /// The sender's heads in local LVs, when `heads_known`. Feed it to [`export_since`] to
    /// answer the sender.
    pub peer_frontier: Option<Frontier>,
}

/// Deadline and cancellation for applying batches.
#[derive(Clone, Debug, Default)]
pub struct SyncSession {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl SyncSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Timeout);
        }
        Ok(())
    }

    /// Validate and apply `batch` to `replica`, all or nothing.
    ///
    /// An operation the replica already has fails the whole batch with `DuplicateOperation`;
    /// build batches with [`export_missing`] or [`export_since`] to avoid overlap.
    pub fn apply(&self, replica: &mut Replica, batch: SyncBatch) -> Result<SyncOutcome> {
        self.check()?;
        replica.oplog().validate_batch(&batch.ops)?;
        self.check()?;

        let received = batch.ops.len();
        let applied = replica.apply_remote_batch(batch.ops)?;
        let peer_frontier = replica
            .oplog()
            .graph()
            .remote_to_local_frontier(&batch.heads)
            .ok();
        debug!(
            received,
            applied = applied.len(),
            heads_known = peer_frontier.is_some(),
            "sync batch applied"
        );
        Ok(SyncOutcome {
            applied,
            heads_known: peer_frontier.is_some(),
            peer_frontier,
        })
    }
}

/// Every operation of `replica` outside the history of `since` (a frontier in `replica`'s LVs).
pub fn export_since(replica: &Replica, since: &Frontier) -> Result<SyncBatch> {
    let oplog = replica.oplog();
    Ok(SyncBatch {
        ops: oplog.remote_ops_since(since)?,
        heads: oplog.graph().local_to_remote_frontier(oplog.version())?,
    })
}

/// Every operation of `replica` whose raw version `peer` does not contain, in LV order.
pub fn export_missing(replica: &Replica, peer: &VersionVector) -> Result<SyncBatch> {
    let oplog = replica.oplog();
    let graph = oplog.graph();
    let mut ops = Vec::new();
    for lv in 0..oplog.len() {
        if !peer.contains(&graph.lv_to_raw(lv)?) {
            ops.push(oplog.to_remote(lv)?);
        }
    }
    Ok(SyncBatch {
        ops,
        heads: graph.local_to_remote_frontier(oplog.version())?,
    })
}
