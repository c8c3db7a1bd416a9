use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the reftable stack.
///
/// `LockContention` is expected under concurrent writers and callers are meant
/// to retry; everything else is terminal for the operation that produced it.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("lock is held by another writer")]
    LockContention,

    #[error("reftable not found after reload deadline: {path}")]
    NotFound { path: PathBuf },

    #[error("update index space exhausted")]
    UpdateIndexOverflow,

    #[error("table write rejected: {0}")]
    InvalidWrite(String),

    #[error("corrupt reftable data: {0}")]
    Corrupt(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StackError>;

impl StackError {
    pub(crate) fn is_not_found_io(&self) -> bool {
        matches!(self, StackError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
