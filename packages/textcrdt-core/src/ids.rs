use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Logical version: dense, 0-based index assigned when an operation enters the local log.
///
/// LVs are only meaningful inside one replica. Anything crossing replicas uses [`RawVersion`].
pub type LV = usize;

/// Identity of an agent (editor/replica). Opaque string.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique identifier for an operation: `(agent, seq)`.
///
/// The derived ordering (agent first, then seq) is the replica-independent tie-break used for
/// sibling order in the Fugue tree and for walker apply order.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawVersion {
    pub agent: AgentId,
    pub seq: u64,
}

impl RawVersion {
    pub fn new(agent: &AgentId, seq: u64) -> Self {
        Self {
            agent: agent.clone(),
            seq,
        }
    }
}

impl fmt::Display for RawVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.agent, self.seq)
    }
}
