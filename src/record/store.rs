use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use tracing::debug;

use super::error::{RecordError, RecordResult};
use super::free_space::FreeSpaceManager;
use super::layout::{BlockLayout, RECORD_HEADER_SIZE, RecordId, read_u32, write_u32};
use crate::file::{BlockFile, BlockId, BufferManager, FileError};

pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const DEFAULT_AVG_STR_LEN: u32 = 50;
pub const DEFAULT_BUFFER_SLOTS: u32 = 10;

/// First block available for records; block 0 is the header.
const FIRST_DATA_BLOCK: BlockId = 1;

/// Creation-time knobs for a string collection.
///
/// `block_size` and `avg_str_len` fix the block geometry forever;
/// `buffer_slots` is persisted too and wins over any later setting when
/// the collection is reopened.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub block_size: u32,
    pub avg_str_len: u32,
    pub buffer_slots: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            avg_str_len: DEFAULT_AVG_STR_LEN,
            buffer_slots: DEFAULT_BUFFER_SLOTS,
        }
    }
}

/// Persisted collection metadata, stored in block 0 of the data file.
///
/// Seven little-endian u32 fields at offset 0, rest of the block zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionHeader {
    pub block_size: u32,
    pub num_dict_slots: u32,
    pub num_free_space_slots: u32,
    pub dict_offset: u32,
    pub next_block_offset: u32,
    pub last_file_block: u32,
    pub buffer_slots: u32,
}

impl CollectionHeader {
    /// Serialized size of the header fields
    pub const SIZE: usize = 28;

    fn write_into(&self, buf: &mut [u8]) {
        buf.fill(0);
        write_u32(buf, 0, self.block_size);
        write_u32(buf, 4, self.num_dict_slots);
        write_u32(buf, 8, self.num_free_space_slots);
        write_u32(buf, 12, self.dict_offset);
        write_u32(buf, 16, self.next_block_offset);
        write_u32(buf, 20, self.last_file_block);
        write_u32(buf, 24, self.buffer_slots);
    }

    fn parse(bytes: &[u8]) -> RecordResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(RecordError::CorruptHeader(
                "buffer too small for the metadata header".to_string(),
            ));
        }
        Ok(Self {
            block_size: read_u32(bytes, 0),
            num_dict_slots: read_u32(bytes, 4),
            num_free_space_slots: read_u32(bytes, 8),
            dict_offset: read_u32(bytes, 12),
            next_block_offset: read_u32(bytes, 16),
            last_file_block: read_u32(bytes, 20),
            buffer_slots: read_u32(bytes, 24),
        })
    }

    /// Read the header prefix of the collection file at `path`.
    fn read_from(path: &Path) -> RecordResult<Self> {
        let mut file = File::open(path).map_err(|source| FileError::OpenFailed {
            path: path.display().to_string(),
            source,
        })?;
        let mut bytes = [0u8; Self::SIZE];
        file.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                RecordError::CorruptHeader("file ends before the metadata header".to_string())
            } else {
                RecordError::Io(e)
            }
        })?;
        Self::parse(&bytes)
    }
}

/// Record store over a single collection file.
///
/// Records are written once and never move, so a `RecordId` stays valid
/// for the life of the collection. Inserts follow a first-fit policy:
/// a block sampled by the free-space manager first, the last file block
/// second, a freshly appended block third. The free-space sample is
/// rebuilt from insert traffic, never persisted.
pub struct StringStore {
    header: CollectionHeader,
    layout: BlockLayout,
    buffer: BufferManager,
    free_space: FreeSpaceManager,
}

impl StringStore {
    /// Create the collection file: header in block 0, one empty data
    /// block after it. The file is flushed and closed; `open` is the
    /// only way to a live store.
    pub fn create<P: AsRef<Path>>(path: P, config: &StoreConfig) -> RecordResult<()> {
        if (config.block_size as usize) < CollectionHeader::SIZE {
            return Err(RecordError::InvalidGeometry(format!(
                "block size {} cannot hold the metadata header",
                config.block_size
            )));
        }
        let layout = BlockLayout::compute(config.block_size, config.avg_str_len)?;
        let header = CollectionHeader {
            block_size: config.block_size,
            num_dict_slots: layout.num_dict_slots(),
            num_free_space_slots: layout.num_free_space_slots(),
            dict_offset: layout.dict_offset(),
            next_block_offset: layout.next_block_offset(),
            last_file_block: FIRST_DATA_BLOCK,
            buffer_slots: config.buffer_slots,
        };

        let file = BlockFile::create(path, config.block_size as usize)?;
        let mut buffer = BufferManager::new(file, config.buffer_slots as usize);
        header.write_into(buffer.append_block_mut(0)?);
        layout.init_block(buffer.append_block_mut(FIRST_DATA_BLOCK)?);
        buffer.flush()?;
        Ok(())
    }

    /// Open an existing collection. The persisted header dictates the
    /// block geometry and the buffer capacity.
    pub fn open<P: AsRef<Path>>(path: P) -> RecordResult<Self> {
        let path = path.as_ref();
        let header = CollectionHeader::read_from(path)?;
        if (header.block_size as usize) < CollectionHeader::SIZE {
            return Err(RecordError::CorruptHeader(format!(
                "implausible block size {}",
                header.block_size
            )));
        }
        if header.last_file_block < FIRST_DATA_BLOCK {
            return Err(RecordError::CorruptHeader(
                "last file block points at the header block".to_string(),
            ));
        }
        let layout = BlockLayout::from_parts(
            header.block_size,
            header.num_dict_slots,
            header.num_free_space_slots,
            header.dict_offset,
            header.next_block_offset,
        )?;

        let file = BlockFile::open(path, header.block_size as usize)?;
        let buffer = BufferManager::new(file, header.buffer_slots.max(1) as usize);

        Ok(Self {
            header,
            layout,
            buffer,
            free_space: FreeSpaceManager::default(),
        })
    }

    pub fn header(&self) -> &CollectionHeader {
        &self.header
    }

    /// Whether the block holding `block` is resident in the buffer.
    pub fn in_cache(&self, block: BlockId) -> bool {
        self.buffer.in_cache(block)
    }

    /// Store `payload` and return its address.
    pub fn insert(&mut self, payload: &[u8]) -> RecordResult<RecordId> {
        let need = payload.len() + RECORD_HEADER_SIZE;
        let capacity = self.layout.record_capacity() as usize;
        if need > capacity {
            return Err(RecordError::RecordTooLarge {
                len: payload.len(),
                max: capacity - RECORD_HEADER_SIZE,
            });
        }

        if let Some(block) = self.free_space.block_with_space(need as u32) {
            match self.insert_into(block, payload) {
                Ok(rid) => return Ok(rid),
                // The sample was stale; insert_into corrected it, so
                // fall through to the append path
                Err(RecordError::NoSpaceInBlock | RecordError::SlotTableExhausted) => {}
                Err(e) => return Err(e),
            }
        }

        match self.insert_into(self.header.last_file_block, payload) {
            Ok(rid) => Ok(rid),
            Err(RecordError::NoSpaceInBlock | RecordError::SlotTableExhausted) => {
                self.append_fresh_block(payload)
            }
            Err(e) => Err(e),
        }
    }

    /// Copy of the payload stored at `rid`.
    pub fn retrieve(&mut self, rid: RecordId) -> RecordResult<Vec<u8>> {
        if rid.block < FIRST_DATA_BLOCK || rid.block > self.header.last_file_block {
            return Err(RecordError::InvalidSlot {
                block: rid.block,
                slot: rid.slot,
            });
        }
        let buf = self.buffer.get_block(rid.block)?;
        Ok(self.layout.record_slice(buf, rid)?.to_vec())
    }

    /// Rewrite the metadata header with the current field values, then
    /// write back and drop every buffered block.
    pub fn flush(&mut self) -> RecordResult<()> {
        let buf = self.buffer.get_block_mut(0)?;
        self.header.write_into(buf);
        self.buffer.flush()?;
        Ok(())
    }

    /// Insert into a specific block, keeping the free-space sample in
    /// step with the outcome.
    fn insert_into(&mut self, block: BlockId, payload: &[u8]) -> RecordResult<RecordId> {
        let buf = self.buffer.get_block_mut(block)?;
        match self.layout.insert_record(buf, payload) {
            Ok(ins) => {
                let usable = if ins.free_slots == 0 { 0 } else { ins.free_space };
                self.free_space.insert(block, usable);
                Ok(RecordId {
                    block,
                    slot: ins.slot,
                })
            }
            Err(e @ (RecordError::NoSpaceInBlock | RecordError::SlotTableExhausted)) => {
                // Correct the sample so the block stops being offered
                // for loads it cannot take
                let usable = if self.layout.free_dict_slot_count(buf) == 0 {
                    0
                } else {
                    self.layout.summary(buf).free_space
                };
                self.free_space.insert(block, usable);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Materialize the next file block and insert into it. The caller
    /// has already checked that the payload fits an empty block.
    fn append_fresh_block(&mut self, payload: &[u8]) -> RecordResult<RecordId> {
        let block = self.header.last_file_block + 1;
        let buf = self.buffer.append_block_mut(block)?;
        self.layout.init_block(buf);
        let ins = self.layout.insert_record(buf, payload)?;
        self.header.last_file_block = block;

        let usable = if ins.free_slots == 0 { 0 } else { ins.free_space };
        self.free_space.insert(block, usable);
        debug!(block, "allocated data block");

        Ok(RecordId {
            block,
            slot: ins.slot,
        })
    }
}

impl Drop for StringStore {
    fn drop(&mut self) {
        // Persist the header along with the data; dropping without an
        // explicit flush must not leave a stale last_file_block behind
        let _ = self.flush();
    }
}
