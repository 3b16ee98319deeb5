use crate::file::FileError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Block has no room for the record payload")]
    NoSpaceInBlock,

    #[error("Block dictionary has no free slot")]
    SlotTableExhausted,

    #[error("Record of {len} bytes exceeds block capacity of {max} bytes")]
    RecordTooLarge { len: usize, max: usize },

    #[error("Invalid slot: block={block}, slot={slot}")]
    InvalidSlot { block: u32, slot: u32 },

    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    #[error("Corrupt collection header: {0}")]
    CorruptHeader(String),

    #[error("Invalid collection geometry: {0}")]
    InvalidGeometry(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
