use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to open {path}: {source}")]
    OpenFailed { path: String, source: io::Error },

    #[error("Failed to read block {block}: {source}")]
    BlockReadFailed { block: u32, source: io::Error },

    #[error("Failed to write block {block}: {source}")]
    BlockWriteFailed { block: u32, source: io::Error },

    #[error("Invalid block size: expected {expected}, got {actual}")]
    InvalidBlockSize { expected: usize, actual: usize },
}

pub type FileResult<T> = Result<T, FileError>;
