use crate::ids::AgentId;
use crate::index::DEFAULT_CHUNK_CAPACITY;

/// Settings for one [`crate::Replica`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Identity stamped on every local operation. Must be unique among live replicas.
    pub agent: AgentId,
    /// Items per position-index chunk. Smaller chunks make edits cheaper and lookups dearer.
    pub index_chunk_capacity: usize,
}

impl ReplicaConfig {
    pub fn new(agent: impl Into<AgentId>) -> Self {
        Self {
            agent: agent.into(),
            index_chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }

    pub fn with_index_chunk_capacity(mut self, capacity: usize) -> Self {
        self.index_chunk_capacity = capacity;
        self
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self::new(AgentId::from("local"))
    }
}
