#![forbid(unsafe_code)]
//! Event-graph text CRDT built on the Fugue sequence algorithm.
//! Operations live in an append-only log over a causal graph; documents are materialized on
//! demand by walking that graph into a Fugue tree, so any version can be checked out and
//! concurrent histories merge without interleaving.

pub mod branch;
pub mod causal_graph;
pub mod config;
pub mod error;
pub mod frontier;
pub mod fugue;
pub mod ids;
mod index;
pub mod ops;
pub mod oplog;
pub mod replica;
pub mod sync;
pub mod undo;
pub mod version_vector;
pub mod walker;

pub use branch::{diff_and_collect, Branch, BranchState, DocumentView};
pub use causal_graph::{CausalGraph, CausalOrder, Diff};
pub use config::ReplicaConfig;
pub use error::{Error, ErrorKind, Result};
pub use frontier::Frontier;
pub use fugue::{FugueTree, Item, ItemSpec};
pub use ids::{AgentId, RawVersion, LV};
pub use index::DEFAULT_CHUNK_CAPACITY;
pub use ops::{OpContent, Operation, RemoteContent, RemoteOp};
pub use oplog::OpLog;
pub use replica::Replica;
pub use sync::{export_missing, export_since, CancelToken, SyncBatch, SyncOutcome, SyncSession};
pub use undo::{UndoManager, UndoOutcome, Undoable};
pub use version_vector::VersionVector;
pub use walker::{Plan, WalkStats};
