use crate::frontier::Frontier;
use crate::ids::{AgentId, RawVersion, LV};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Payload of an operation, with every reference expressed as a local LV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpContent {
    /// Insert one character between two neighbours as seen when the edit was made.
    ///
    /// `origin_left` / `origin_right` are the insert ops of the neighbouring items (tombstones
    /// included); `None` means document start / end.
    Insert {
        content: char,
        origin_left: Option<LV>,
        origin_right: Option<LV>,
    },
    /// Hide the item created by insert op `target`.
    Delete { target: LV },
    /// Revive the item created by insert op `target`.
    Undelete { target: LV },
}

impl OpContent {
    /// Item this operation acts on: the new item for inserts, the target otherwise.
    pub fn target(&self, own_lv: LV) -> LV {
        match *self {
            OpContent::Insert { .. } => own_lv,
            OpContent::Delete { target } | OpContent::Undelete { target } => target,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, OpContent::Insert { .. })
    }
}

/// An operation as stored in the local log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub lv: LV,
    pub id: RawVersion,
    pub parents: Frontier,
    pub content: OpContent,
}

impl Operation {
    pub fn agent(&self) -> &AgentId {
        &self.id.agent
    }

    pub fn seq(&self) -> u64 {
        self.id.seq
    }
}

/// Payload of an operation in wire form: references are raw versions.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum RemoteContent {
    Insert {
        content: char,
        origin_left: Option<RawVersion>,
        origin_right: Option<RawVersion>,
    },
    Delete {
        target: RawVersion,
    },
    Undelete {
        target: RawVersion,
    },
}

impl RemoteContent {
    /// Raw versions this payload refers to, besides the causal parents.
    pub fn references(&self) -> impl Iterator<Item = &RawVersion> {
        let (a, b) = match self {
            RemoteContent::Insert {
                origin_left,
                origin_right,
                ..
            } => (origin_left.as_ref(), origin_right.as_ref()),
            RemoteContent::Delete { target } | RemoteContent::Undelete { target } => {
                (Some(target), None)
            }
        };
        a.into_iter().chain(b)
    }
}

/// Full operation envelope exchanged between replicas.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteOp {
    pub id: RawVersion,
    pub parents: Vec<RawVersion>,
    pub content: RemoteContent,
}

impl RemoteOp {
    pub fn insert(
        agent: &AgentId,
        seq: u64,
        parents: Vec<RawVersion>,
        content: char,
        origin_left: Option<RawVersion>,
        origin_right: Option<RawVersion>,
    ) -> Self {
        Self {
            id: RawVersion::new(agent, seq),
            parents,
            content: RemoteContent::Insert {
                content,
                origin_left,
                origin_right,
            },
        }
    }

    pub fn delete(agent: &AgentId, seq: u64, parents: Vec<RawVersion>, target: RawVersion) -> Self {
        Self {
            id: RawVersion::new(agent, seq),
            parents,
            content: RemoteContent::Delete { target },
        }
    }

    pub fn undelete(
        agent: &AgentId,
        seq: u64,
        parents: Vec<RawVersion>,
        target: RawVersion,
    ) -> Self {
        Self {
            id: RawVersion::new(agent, seq),
            parents,
            content: RemoteContent::Undelete { target },
        }
    }
}
