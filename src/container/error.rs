use std::io;

use thiserror::Error;

use crate::record::RecordError;

use super::StringId;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to open {path}: {source}")]
    OpenFailed { path: String, source: io::Error },

    #[error("Corrupt rid-map file: {0}")]
    CorruptSideFile(String),

    #[error("Unknown string id {0}")]
    InvalidStringId(StringId),

    #[error("Record for string id {0} is not valid UTF-8")]
    CorruptRecord(StringId),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

pub type ContainerResult<T> = Result<T, ContainerError>;
