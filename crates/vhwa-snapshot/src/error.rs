use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("invalid magic {found:#010x} (expected {expected:#010x})")]
    InvalidMagic { expected: u32, found: u32 },

    #[error("unsupported state version {found} (newest known is {newest})")]
    UnsupportedVersion { found: u32, newest: u32 },

    #[error("corrupt saved state: {0}")]
    Corrupt(&'static str),

    /// A record that only exists transiently (e.g. a host callback) was found while saving.
    #[error("transient record cannot be saved: {0}")]
    Transient(&'static str),
}

impl SnapshotError {
    /// True when the stream ended before the requested field.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}
