use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("missing parent: {0}")]
    MissingParent(String),
    #[error("missing entry: {0}")]
    MissingEntry(String),
    #[error("duplicate operation: {0}")]
    DuplicateOperation(String),
    #[error("missing item: {0}")]
    MissingItem(String),
    #[error("position {pos} out of bounds (length {len})")]
    OutOfBounds { pos: usize, len: usize },
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("sync round timed out")]
    Timeout,
    #[error("sync round cancelled")]
    Cancelled,
}

/// Coarse classification callers use to decide between retrying, discarding or escalating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An operation references a causal ancestor or identity the graph does not know.
    CausalIntegrity,
    /// The same raw version was submitted twice.
    Duplicate,
    /// A delete/undelete or lookup references an item that is not in the tree.
    MissingTarget,
    /// The caller asked for something outside the current document.
    InvalidRequest,
    Internal,
    /// The transport aborted the round; nothing was applied.
    Transport,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingParent(_) | Error::MissingEntry(_) => ErrorKind::CausalIntegrity,
            Error::DuplicateOperation(_) => ErrorKind::Duplicate,
            Error::MissingItem(_) => ErrorKind::MissingTarget,
            Error::OutOfBounds { .. } => ErrorKind::InvalidRequest,
            Error::InconsistentState(_) => ErrorKind::Internal,
            Error::Timeout | Error::Cancelled => ErrorKind::Transport,
        }
    }

    /// Transport failures leave core state untouched, so the same round can be retried as is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}
