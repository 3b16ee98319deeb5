use ahash::AHashMap;

use super::BlockId;
use super::block_file::BlockFile;
use super::error::FileResult;

/// One slot of the buffer arena.
#[derive(Debug)]
struct Frame {
    /// The actual block data
    data: Vec<u8>,
    /// Block resident in this frame, if any
    block: Option<BlockId>,
    /// Second-chance bit, set on every access
    referenced: bool,
    /// Whether this block has been modified
    dirty: bool,
}

impl Frame {
    fn empty(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size],
            block: None,
            referenced: false,
            dirty: false,
        }
    }
}

/// Fixed-capacity block cache with second-chance (clock) eviction.
///
/// Frames live in a fixed arena; `cache_map` maps resident block numbers
/// to frame indices and the clock hand sweeps the arena for eviction
/// victims. An access sets the frame's referenced bit, so the frame
/// survives the next sweep. Dirty frames are written back before reuse.
///
/// `get_block_mut` marks the frame dirty before handing out the buffer,
/// so every mutable access is persisted on eviction or flush without the
/// caller having to remember anything.
#[derive(Debug)]
pub struct BufferManager {
    file: BlockFile,
    frames: Vec<Frame>,
    cache_map: AHashMap<BlockId, usize>,
    hand: usize,
}

impl BufferManager {
    /// Create a buffer manager with `buffer_slots` frames over `file`.
    /// Capacity is clamped to at least one frame.
    pub fn new(file: BlockFile, buffer_slots: usize) -> Self {
        let slots = buffer_slots.max(1);
        let block_size = file.block_size();
        let frames = (0..slots).map(|_| Frame::empty(block_size)).collect();

        Self {
            file,
            frames,
            cache_map: AHashMap::new(),
            hand: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.file.block_size()
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Whether `block` is currently resident. No cache state changes.
    pub fn in_cache(&self, block: BlockId) -> bool {
        self.cache_map.contains_key(&block)
    }

    /// Get a block for reading.
    pub fn get_block(&mut self, block: BlockId) -> FileResult<&[u8]> {
        let idx = self.fetch(block, false)?;
        Ok(&self.frames[idx].data)
    }

    /// Get a block for writing. The frame is marked dirty up front.
    pub fn get_block_mut(&mut self, block: BlockId) -> FileResult<&mut [u8]> {
        let idx = self.fetch(block, false)?;
        let frame = &mut self.frames[idx];
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    /// Get a frame for a block that does not exist on disk yet, skipping
    /// the read. The caller must initialize the whole buffer; its previous
    /// contents are unspecified.
    pub fn append_block_mut(&mut self, block: BlockId) -> FileResult<&mut [u8]> {
        let idx = self.fetch(block, true)?;
        let frame = &mut self.frames[idx];
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    /// Write back every resident frame, reset the arena to empty, and
    /// sync the file. After a flush the cache holds nothing.
    pub fn flush(&mut self) -> FileResult<()> {
        for idx in 0..self.frames.len() {
            if let Some(block) = self.frames[idx].block.take() {
                self.file.write_block(block, &self.frames[idx].data)?;
            }
            let frame = &mut self.frames[idx];
            frame.referenced = false;
            frame.dirty = false;
        }
        self.cache_map.clear();
        self.file.sync()?;
        Ok(())
    }

    /// Pin `block` into a frame and return the frame index.
    fn fetch(&mut self, block: BlockId, append: bool) -> FileResult<usize> {
        if let Some(&idx) = self.cache_map.get(&block) {
            self.frames[idx].referenced = true;
            return Ok(idx);
        }

        // Clock sweep: clear referenced bits until a frame without one
        // comes up. Every resident block gets a second chance before
        // eviction.
        while self.frames[self.hand].referenced {
            self.frames[self.hand].referenced = false;
            self.hand = (self.hand + 1) % self.frames.len();
        }
        let idx = self.hand;

        if let Some(old) = self.frames[idx].block.take() {
            if self.frames[idx].dirty {
                self.file.write_block(old, &self.frames[idx].data)?;
            }
            self.cache_map.remove(&old);
        }

        if !append {
            self.file.read_block(block, &mut self.frames[idx].data)?;
        }

        let frame = &mut self.frames[idx];
        frame.block = Some(block);
        frame.referenced = true;
        frame.dirty = false;
        self.cache_map.insert(block, idx);

        Ok(idx)
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Best effort: persist whatever is still resident
        let _ = self.flush();
    }
}
