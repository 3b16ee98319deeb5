mod block_file;
mod buffer_manager;
mod error;

pub use block_file::BlockFile;
pub use buffer_manager::BufferManager;
pub use error::{FileError, FileResult};

/// Block number within a data file. Block 0 is the metadata header;
/// data blocks start at 1.
pub type BlockId = u32;
