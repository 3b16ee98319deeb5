use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::BlockId;
use super::error::{FileError, FileResult};

/// Block-addressed access to a single data file.
///
/// The block size is fixed per file and chosen by the caller: at creation
/// time from configuration, at open time from the persisted metadata
/// header. All offsets are `block * block_size`.
#[derive(Debug)]
pub struct BlockFile {
    file: File,
    path: PathBuf,
    block_size: usize,
}

impl BlockFile {
    /// Create (or truncate) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize) -> FileResult<Self> {
        let path = path.as_ref();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| FileError::OpenFailed {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
        })
    }

    /// Open an existing file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> FileResult<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| FileError::OpenFailed {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a block into `buffer`.
    ///
    /// Reading at or past the end of the file is not an error: the
    /// unwritten tail of the buffer is filled with zeros.
    pub fn read_block(&mut self, block: BlockId, buffer: &mut [u8]) -> FileResult<()> {
        if buffer.len() != self.block_size {
            return Err(FileError::InvalidBlockSize {
                expected: self.block_size,
                actual: buffer.len(),
            });
        }

        let offset = block as u64 * self.block_size as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| FileError::BlockReadFailed { block, source })?;

        let mut filled = 0;
        while filled < buffer.len() {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(FileError::BlockReadFailed { block, source }),
            }
        }

        // If we read less than a full block, fill the rest with zeros
        buffer[filled..].fill(0);

        Ok(())
    }

    /// Write a block; the file grows as needed.
    pub fn write_block(&mut self, block: BlockId, buffer: &[u8]) -> FileResult<()> {
        if buffer.len() != self.block_size {
            return Err(FileError::InvalidBlockSize {
                expected: self.block_size,
                actual: buffer.len(),
            });
        }

        let offset = block as u64 * self.block_size as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(buffer))
            .map_err(|source| FileError::BlockWriteFailed { block, source })?;
        // Note: Don't sync on every write - let the OS buffer and batch writes.
        // Sync happens in sync(), called by the buffer manager's flush.

        Ok(())
    }

    /// Flush OS buffers for this file to disk.
    pub fn sync(&mut self) -> FileResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
