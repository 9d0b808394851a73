//! Crate-wide error taxonomy (spec §7).
//
// Recoverable kinds (NotFound, Exists, Conflict) are absorbed at the call
// site and never reach a caller of a composite op; everything else is
// fatal and propagates with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardError {
    /// Expected for absent shards during read/truncate/unlink/rename.
    #[error("not found")]
    NotFound,

    /// Expected for mknod racing a concurrent shard creation.
    #[error("already exists")]
    Exists,

    /// Non-blocking entrylk busy: another worker owns this gfid.
    #[error("conflict: lock held elsewhere")]
    Conflict,

    #[error("out of memory")]
    OutOfMemory,

    /// Missing required xdata or malformed wire input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Specific fop doesn't support the requested mode (e.g. fallocate mode).
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl ShardError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ShardError::NotFound | ShardError::Exists | ShardError::Conflict)
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
