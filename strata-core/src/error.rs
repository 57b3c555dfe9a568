use std::path::PathBuf;

use thiserror::Error;

/// The main result type for strata-core operations.
pub type LogResult<T> = Result<T, LogError>;

/// Enum representing possible errors within the strata-core library.
#[derive(Error, Debug)]
pub enum LogError {
    /// The requested offset is not (or no longer) present in the log.
    #[error("offset out of range: {offset}")]
    OffsetOutOfRange { offset: u64 },

    /// The index file on disk is larger than the configured cap, which
    /// usually means the cap was shrunk between runs.
    #[error("index file size {size} exceeds configured maximum of {max_index_bytes} bytes")]
    IndexMaxSizeExceeded { size: u64, max_index_bytes: u64 },

    /// End of data: an empty or past-the-end index lookup, or an index
    /// write with no mmap room left.
    #[error("end of file")]
    Eof,

    /// Another log instance holds the exclusive lock on the directory.
    #[error("log directory {path:?} is locked by another process")]
    DirectoryLocked { path: PathBuf },

    /// The log was closed or removed; reopen the directory to resume.
    #[error("log is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("record encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

impl LogError {
    /// Returns true for the end-of-data signalling class.
    pub fn is_eof(&self) -> bool {
        matches!(self, LogError::Eof)
    }
}

impl From<LogError> for std::io::Error {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Io(io) => io,
            LogError::Eof => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
