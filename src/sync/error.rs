use std::fmt;

use thiserror::Error;

/// The mirror operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Clone,
    Open,
    Checkout,
    Fetch,
    Resolve,
    Reset,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Clone => "clone",
            Operation::Open => "open",
            Operation::Checkout => "checkout",
            Operation::Fetch => "fetch",
            Operation::Resolve => "resolve",
            Operation::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`SyncError`], used by callers to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Remote unreachable or authentication failed. Worth retrying later.
    Transport,
    /// Local state is incompatible with the request. Needs an operator.
    Conflict,
    /// The reference or repository does not exist locally.
    NotFound,
    /// Local filesystem failure.
    Io,
    /// Any other failure reported by the revision-control engine.
    Engine,
    /// Rejected before reaching the engine.
    Invalid,
}

/// Errors returned by mirror operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{op} {target}: transport failure: {message}")]
    Transport {
        op: Operation,
        target: String,
        message: String,
    },

    #[error("{op} {target}: conflicting local state: {message}")]
    Conflict {
        op: Operation,
        target: String,
        message: String,
    },

    #[error("{op} {target}: not found: {message}")]
    NotFound {
        op: Operation,
        target: String,
        message: String,
    },

    #[error("{op} {target}: IO error: {source}")]
    Io {
        op: Operation,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} {target}: git operation failed: {source}")]
    Git {
        op: Operation,
        target: String,
        #[source]
        source: git2::Error,
    },

    #[error("mirror lock acquisition failed: {0}")]
    Lock(#[source] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub(crate) fn io(op: Operation, target: impl fmt::Display, source: std::io::Error) -> Self {
        SyncError::Io {
            op,
            target: target.to_string(),
            source,
        }
    }

    /// Classify a libgit2 error into the sync taxonomy.
    pub(crate) fn from_git(op: Operation, target: impl fmt::Display, err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};

        let target = target.to_string();
        let message = err.message().to_string();

        match (err.class(), err.code()) {
            (ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl, _)
            | (_, ErrorCode::Auth | ErrorCode::Certificate) => SyncError::Transport {
                op,
                target,
                message,
            },
            (_, ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::UnbornBranch) => {
                SyncError::NotFound {
                    op,
                    target,
                    message,
                }
            }
            (
                _,
                ErrorCode::Exists
                | ErrorCode::Conflict
                | ErrorCode::Locked
                | ErrorCode::Modified
                | ErrorCode::Uncommitted,
            ) => SyncError::Conflict {
                op,
                target,
                message,
            },
            _ => SyncError::Git {
                op,
                target,
                source: err,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport { .. } => ErrorKind::Transport,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::Io { .. } | SyncError::Lock(_) => ErrorKind::Io,
            SyncError::Git { source, .. } => match source.class() {
                git2::ErrorClass::Os | git2::ErrorClass::Filesystem => ErrorKind::Io,
                _ => ErrorKind::Engine,
            },
            SyncError::InvalidInput(_) => ErrorKind::Invalid,
        }
    }

    /// Whether a later attempt may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport { .. } => true,
            SyncError::Lock(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}
