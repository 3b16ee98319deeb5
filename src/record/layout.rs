//! Slotted block format for variable-length records.
//!
//! Every data block is laid out as (all integers little-endian):
//!
//! ```text
//! +--------------------------------------------------------------+
//! | free-space entries: num_free_space_slots x (free, offset) u32|
//! +--------------------------------------------------------------+
//! | payload: records as [len: u32][len bytes], grows upward      |
//! |                          ...                                 |
//! +--------------------------------------------------------------+
//! | dictionary: num_dict_slots x u32 offsets    (at dict_offset) |
//! +--------------------------------------------------------------+
//! | next block pointer: u32               (at next_block_offset) |
//! +--------------------------------------------------------------+
//! ```
//!
//! The free-space entry table is kept sorted descending by free space, so
//! entry 0 always summarizes the largest free extent. `free_space == 0`
//! marks an unused entry. Dictionary slots hold the offset of a record's
//! length prefix; `0xFFFF_FFFF` marks a free slot. A record's address is
//! (block number, dictionary slot index).

use super::error::{RecordError, RecordResult};
use crate::file::BlockId;

/// Dictionary slot index within a block
pub type SlotId = u32;

/// Location of a record in the collection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub block: BlockId,
    pub slot: SlotId,
}

/// Dictionary slot value meaning "no record here"
pub const UNUSED_DICT_SLOT: u32 = 0xFFFF_FFFF;

/// Next-pointer value meaning "block not linked"
pub const UNUSED_NEXT_PTR: u32 = 0xFFFF_FFFF;

/// Bytes of bookkeeping per record: the u32 length prefix
pub const RECORD_HEADER_SIZE: usize = 4;

const FREE_ENTRY_SIZE: usize = 8;
const DICT_ENTRY_SIZE: usize = 4;
const NEXT_PTR_SIZE: usize = 4;

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// One free-space entry: `free_space` contiguous free bytes starting at
/// `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpaceEntry {
    pub free_space: u32,
    pub offset: u32,
}

/// Outcome of a successful in-block insert.
#[derive(Debug, Clone, Copy)]
pub struct BlockInsert {
    /// Dictionary slot claimed by the record
    pub slot: SlotId,
    /// Free payload bytes remaining in the block
    pub free_space: u32,
    /// Free dictionary slots remaining
    pub free_slots: u32,
}

/// Derived block geometry plus the intra-block operations.
///
/// The geometry is a pure function of `block_size` and `avg_str_len`:
///
/// - `num_dict_slots = block_size / (avg_str_len + 4)`
/// - `num_free_space_slots = num_dict_slots / 2`
/// - `dict_offset = block_size - 4 - num_dict_slots * 4`
/// - `next_block_offset = block_size - 4`
///
/// All operations work on a caller-provided block buffer; the layout
/// itself holds no block state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    block_size: u32,
    num_dict_slots: u32,
    num_free_space_slots: u32,
    dict_offset: u32,
    next_block_offset: u32,
}

impl BlockLayout {
    /// Derive the geometry for `block_size` and the expected average
    /// record length. Rejects combinations that leave no slots or no
    /// payload room.
    pub fn compute(block_size: u32, avg_str_len: u32) -> RecordResult<Self> {
        if avg_str_len == 0 {
            return Err(RecordError::InvalidGeometry(
                "average record length must be nonzero".to_string(),
            ));
        }
        let per_record = avg_str_len as u64 + RECORD_HEADER_SIZE as u64;
        let num_dict_slots = (block_size as u64 / per_record) as u32;
        Self::with_slots(block_size, num_dict_slots)
    }

    /// Rebuild the geometry from persisted header fields, verifying that
    /// the stored offsets agree with the derivation.
    pub fn from_parts(
        block_size: u32,
        num_dict_slots: u32,
        num_free_space_slots: u32,
        dict_offset: u32,
        next_block_offset: u32,
    ) -> RecordResult<Self> {
        let layout = Self::with_slots(block_size, num_dict_slots)
            .map_err(|e| RecordError::CorruptHeader(e.to_string()))?;
        if layout.num_free_space_slots != num_free_space_slots
            || layout.dict_offset != dict_offset
            || layout.next_block_offset != next_block_offset
        {
            return Err(RecordError::CorruptHeader(
                "stored offsets disagree with the derived geometry".to_string(),
            ));
        }
        Ok(layout)
    }

    fn with_slots(block_size: u32, num_dict_slots: u32) -> RecordResult<Self> {
        let num_free_space_slots = num_dict_slots / 2;
        if num_free_space_slots == 0 {
            return Err(RecordError::InvalidGeometry(format!(
                "block size {block_size} leaves {num_dict_slots} dictionary slots; at least 2 are required"
            )));
        }

        let metadata = NEXT_PTR_SIZE as u64
            + num_dict_slots as u64 * DICT_ENTRY_SIZE as u64
            + num_free_space_slots as u64 * FREE_ENTRY_SIZE as u64;
        if metadata >= block_size as u64 {
            return Err(RecordError::InvalidGeometry(format!(
                "block size {block_size} leaves no payload room after {metadata} metadata bytes"
            )));
        }

        Ok(Self {
            block_size,
            num_dict_slots,
            num_free_space_slots,
            dict_offset: block_size
                - NEXT_PTR_SIZE as u32
                - num_dict_slots * DICT_ENTRY_SIZE as u32,
            next_block_offset: block_size - NEXT_PTR_SIZE as u32,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn num_dict_slots(&self) -> u32 {
        self.num_dict_slots
    }

    pub fn num_free_space_slots(&self) -> u32 {
        self.num_free_space_slots
    }

    pub fn dict_offset(&self) -> u32 {
        self.dict_offset
    }

    pub fn next_block_offset(&self) -> u32 {
        self.next_block_offset
    }

    /// First payload byte: the payload region starts right after the
    /// free-space entry table.
    pub fn payload_start(&self) -> u32 {
        self.num_free_space_slots * FREE_ENTRY_SIZE as u32
    }

    /// Payload bytes (record headers included) a fresh block can hold.
    pub fn record_capacity(&self) -> u32 {
        self.dict_offset - self.payload_start()
    }

    /// Format `buf` as an empty data block.
    pub fn init_block(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.block_size as usize);
        buf.fill(0);
        // Dictionary and next pointer are contiguous at the block tail;
        // 0xFF bytes mark every slot unused and the block unlinked.
        buf[self.dict_offset as usize..].fill(0xFF);
        self.write_free_entry(
            buf,
            0,
            FreeSpaceEntry {
                free_space: self.record_capacity(),
                offset: self.payload_start(),
            },
        );
    }

    /// The block's summary entry: its largest contiguous free extent.
    pub fn summary(&self, buf: &[u8]) -> FreeSpaceEntry {
        self.free_entry(buf, 0)
    }

    /// Append `payload` to the block and claim a dictionary slot for it.
    ///
    /// Byte exhaustion (`NoSpaceInBlock`) and dictionary exhaustion
    /// (`SlotTableExhausted`) are distinct conditions; the latter can
    /// occur with plenty of payload bytes left.
    pub fn insert_record(&self, buf: &mut [u8], payload: &[u8]) -> RecordResult<BlockInsert> {
        let summary = self.summary(buf);
        let need = payload.len() + RECORD_HEADER_SIZE;
        if (summary.free_space as usize) < need {
            return Err(RecordError::NoSpaceInBlock);
        }

        let slot = self
            .find_free_dict_slot(buf)
            .ok_or(RecordError::SlotTableExhausted)?;

        let off = summary.offset as usize;
        write_u32(buf, off, payload.len() as u32);
        buf[off + RECORD_HEADER_SIZE..off + need].copy_from_slice(payload);
        self.set_dict_entry(buf, slot, summary.offset);

        self.write_free_entry(
            buf,
            0,
            FreeSpaceEntry {
                free_space: summary.free_space - need as u32,
                offset: summary.offset + need as u32,
            },
        );
        self.sort_free_entries(buf);

        Ok(BlockInsert {
            slot,
            free_space: self.summary(buf).free_space,
            free_slots: self.free_dict_slot_count(buf),
        })
    }

    /// Payload bytes of the record in `rid`'s slot.
    pub fn record_slice<'a>(&self, buf: &'a [u8], rid: RecordId) -> RecordResult<&'a [u8]> {
        if rid.slot >= self.num_dict_slots {
            return Err(RecordError::InvalidSlot {
                block: rid.block,
                slot: rid.slot,
            });
        }
        let offset = self.dict_entry(buf, rid.slot);
        if offset == UNUSED_DICT_SLOT {
            return Err(RecordError::InvalidSlot {
                block: rid.block,
                slot: rid.slot,
            });
        }

        let off = offset as usize;
        let dict = self.dict_offset as usize;
        if off < self.payload_start() as usize || off + RECORD_HEADER_SIZE > dict {
            return Err(RecordError::CorruptBlock(format!(
                "record offset {off} outside the payload region of block {}",
                rid.block
            )));
        }
        let len = read_u32(buf, off) as usize;
        if off + RECORD_HEADER_SIZE + len > dict {
            return Err(RecordError::CorruptBlock(format!(
                "record of {len} bytes at offset {off} overruns block {}",
                rid.block
            )));
        }

        Ok(&buf[off + RECORD_HEADER_SIZE..off + RECORD_HEADER_SIZE + len])
    }

    /// Number of unclaimed dictionary slots.
    pub fn free_dict_slot_count(&self, buf: &[u8]) -> u32 {
        (0..self.num_dict_slots)
            .filter(|&slot| self.dict_entry(buf, slot) == UNUSED_DICT_SLOT)
            .count() as u32
    }

    /// The chained block, if this block has been linked to one. The
    /// current allocation policy never links blocks; the pointer exists
    /// in the format and round-trips through it.
    pub fn next_block(&self, buf: &[u8]) -> Option<BlockId> {
        let value = read_u32(buf, self.next_block_offset as usize);
        if value == UNUSED_NEXT_PTR {
            None
        } else {
            Some(value)
        }
    }

    pub fn set_next_block(&self, buf: &mut [u8], next: Option<BlockId>) {
        write_u32(
            buf,
            self.next_block_offset as usize,
            next.unwrap_or(UNUSED_NEXT_PTR),
        );
    }

    fn find_free_dict_slot(&self, buf: &[u8]) -> Option<SlotId> {
        (0..self.num_dict_slots).find(|&slot| self.dict_entry(buf, slot) == UNUSED_DICT_SLOT)
    }

    fn dict_entry(&self, buf: &[u8], slot: SlotId) -> u32 {
        read_u32(
            buf,
            self.dict_offset as usize + slot as usize * DICT_ENTRY_SIZE,
        )
    }

    fn set_dict_entry(&self, buf: &mut [u8], slot: SlotId, value: u32) {
        write_u32(
            buf,
            self.dict_offset as usize + slot as usize * DICT_ENTRY_SIZE,
            value,
        );
    }

    fn free_entry(&self, buf: &[u8], index: usize) -> FreeSpaceEntry {
        let off = index * FREE_ENTRY_SIZE;
        FreeSpaceEntry {
            free_space: read_u32(buf, off),
            offset: read_u32(buf, off + 4),
        }
    }

    fn write_free_entry(&self, buf: &mut [u8], index: usize, entry: FreeSpaceEntry) {
        let off = index * FREE_ENTRY_SIZE;
        write_u32(buf, off, entry.free_space);
        write_u32(buf, off + 4, entry.offset);
    }

    /// Restore the descending free-space order of the entry table.
    fn sort_free_entries(&self, buf: &mut [u8]) {
        let n = self.num_free_space_slots as usize;
        let mut entries: Vec<FreeSpaceEntry> = (0..n).map(|i| self.free_entry(buf, i)).collect();
        entries.sort_by(|a, b| b.free_space.cmp(&a.free_space));
        for (i, entry) in entries.into_iter().enumerate() {
            self.write_free_entry(buf, i, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // block_size 256, avg_str_len 10:
    //   num_dict_slots = 256 / 14 = 18, num_free_space_slots = 9
    //   dict_offset = 256 - 4 - 72 = 180, next_block_offset = 252
    //   payload starts at 72, capacity = 180 - 72 = 108
    fn small_layout() -> BlockLayout {
        BlockLayout::compute(256, 10).unwrap()
    }

    fn fresh_block(layout: &BlockLayout) -> Vec<u8> {
        let mut buf = vec![0u8; layout.block_size() as usize];
        layout.init_block(&mut buf);
        buf
    }

    #[test]
    fn test_geometry_derivation() {
        let layout = small_layout();
        assert_eq!(layout.num_dict_slots(), 18);
        assert_eq!(layout.num_free_space_slots(), 9);
        assert_eq!(layout.dict_offset(), 180);
        assert_eq!(layout.next_block_offset(), 252);
        assert_eq!(layout.payload_start(), 72);
        assert_eq!(layout.record_capacity(), 108);
    }

    #[test]
    fn test_geometry_rejects_degenerate_blocks() {
        // 16 / 14 = 1 dictionary slot, no free-space slot at all
        assert!(matches!(
            BlockLayout::compute(16, 10),
            Err(RecordError::InvalidGeometry(_))
        ));
        assert!(matches!(
            BlockLayout::compute(4096, 0),
            Err(RecordError::InvalidGeometry(_))
        ));
        // 3 slots fit but metadata (4 + 12 + 8) covers the whole block
        assert!(matches!(
            BlockLayout::compute(24, 4),
            Err(RecordError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_from_parts_round_trip() {
        let layout = small_layout();
        let rebuilt = BlockLayout::from_parts(256, 18, 9, 180, 252).unwrap();
        assert_eq!(rebuilt, layout);
    }

    #[test]
    fn test_from_parts_rejects_inconsistent_offsets() {
        assert!(matches!(
            BlockLayout::from_parts(256, 18, 9, 176, 252),
            Err(RecordError::CorruptHeader(_))
        ));
        assert!(matches!(
            BlockLayout::from_parts(256, 0, 0, 180, 252),
            Err(RecordError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_init_block_state() {
        let layout = small_layout();
        let buf = fresh_block(&layout);

        assert_eq!(
            layout.summary(&buf),
            FreeSpaceEntry {
                free_space: 108,
                offset: 72
            }
        );
        assert_eq!(layout.free_dict_slot_count(&buf), 18);
        assert_eq!(layout.next_block(&buf), None);
        // Remaining free-space entries are unused
        for i in 1..9 {
            assert_eq!(layout.free_entry(&buf, i).free_space, 0);
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);

        let first = layout.insert_record(&mut buf, b"hello").unwrap();
        assert_eq!(first.slot, 0);
        assert_eq!(first.free_space, 108 - 9);
        assert_eq!(first.free_slots, 17);

        let second = layout.insert_record(&mut buf, b"world!").unwrap();
        assert_eq!(second.slot, 1);
        assert_eq!(second.free_space, 108 - 9 - 10);

        let rid = |slot| RecordId { block: 1, slot };
        assert_eq!(layout.record_slice(&buf, rid(0)).unwrap(), b"hello");
        assert_eq!(layout.record_slice(&buf, rid(1)).unwrap(), b"world!");
    }

    #[test]
    fn test_empty_payload() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);

        let ins = layout.insert_record(&mut buf, b"").unwrap();
        assert_eq!(ins.free_space, 104);
        assert_eq!(
            layout
                .record_slice(&buf, RecordId { block: 1, slot: 0 })
                .unwrap(),
            b""
        );
    }

    #[test]
    fn test_byte_exhaustion() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);

        // 104 payload bytes + 4 header = exact fit for the 108 capacity
        layout.insert_record(&mut buf, &[b'x'; 104]).unwrap();
        assert_eq!(layout.summary(&buf).free_space, 0);

        assert!(matches!(
            layout.insert_record(&mut buf, b"y"),
            Err(RecordError::NoSpaceInBlock)
        ));
    }

    #[test]
    fn test_slot_exhaustion_with_bytes_left() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);

        // 18 empty records consume all dictionary slots but only 72 of
        // the 108 payload bytes
        for _ in 0..18 {
            layout.insert_record(&mut buf, b"").unwrap();
        }
        assert_eq!(layout.summary(&buf).free_space, 36);
        assert_eq!(layout.free_dict_slot_count(&buf), 0);

        assert!(matches!(
            layout.insert_record(&mut buf, b""),
            Err(RecordError::SlotTableExhausted)
        ));
    }

    #[test]
    fn test_capacity_bookkeeping() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);

        let payloads: [&[u8]; 4] = [b"a", b"bb", b"ccc", b"dddd"];
        let mut used = 0;
        for payload in payloads {
            layout.insert_record(&mut buf, payload).unwrap();
            used += payload.len() + RECORD_HEADER_SIZE;
            assert_eq!(
                layout.summary(&buf).free_space as usize,
                layout.record_capacity() as usize - used
            );
        }

        // Entry table still descending
        let entries: Vec<_> = (0..9).map(|i| layout.free_entry(&buf, i)).collect();
        for pair in entries.windows(2) {
            assert!(pair[0].free_space >= pair[1].free_space);
        }
    }

    #[test]
    fn test_record_slice_invalid_slot() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);
        layout.insert_record(&mut buf, b"only").unwrap();

        // Claimed slot reads fine, unclaimed and out-of-range do not
        let unclaimed = layout.record_slice(&buf, RecordId { block: 3, slot: 1 });
        assert!(matches!(
            unclaimed,
            Err(RecordError::InvalidSlot { block: 3, slot: 1 })
        ));
        let out_of_range = layout.record_slice(&buf, RecordId { block: 3, slot: 99 });
        assert!(matches!(out_of_range, Err(RecordError::InvalidSlot { .. })));
    }

    #[test]
    fn test_record_slice_corrupt_offset() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);
        layout.insert_record(&mut buf, b"data").unwrap();

        // Point slot 0 into the dictionary itself
        layout.set_dict_entry(&mut buf, 0, 200);
        assert!(matches!(
            layout.record_slice(&buf, RecordId { block: 1, slot: 0 }),
            Err(RecordError::CorruptBlock(_))
        ));

        // Plausible offset, absurd length
        layout.set_dict_entry(&mut buf, 0, 72);
        write_u32(&mut buf, 72, 10_000);
        assert!(matches!(
            layout.record_slice(&buf, RecordId { block: 1, slot: 0 }),
            Err(RecordError::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_next_block_round_trip() {
        let layout = small_layout();
        let mut buf = fresh_block(&layout);

        layout.set_next_block(&mut buf, Some(7));
        assert_eq!(layout.next_block(&buf), Some(7));

        layout.set_next_block(&mut buf, None);
        assert_eq!(layout.next_block(&buf), None);
        assert_eq!(&buf[252..256], &[0xFF; 4]);
    }

    #[test]
    fn test_exact_block_image() {
        // Full byte-level image of a block after three inserts; anything
        // that drifts from the on-disk format fails here.
        let layout = small_layout();
        let mut buf = fresh_block(&layout);
        layout.insert_record(&mut buf, b"a").unwrap();
        layout.insert_record(&mut buf, b"bb").unwrap();
        layout.insert_record(&mut buf, b"ccc").unwrap();

        let mut expected = Vec::with_capacity(256);
        // Summary entry: 108 - (5 + 6 + 7) = 90 free at offset 72 + 18 = 90
        expected.extend_from_slice(&90u32.to_le_bytes());
        expected.extend_from_slice(&90u32.to_le_bytes());
        // Eight unused entries
        expected.extend_from_slice(&[0u8; 64]);
        // Records
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(b"a");
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"bb");
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(b"ccc");
        // Unwritten payload up to the dictionary at 180
        expected.resize(180, 0);
        // Dictionary: three claimed slots, fifteen unused
        expected.extend_from_slice(&72u32.to_le_bytes());
        expected.extend_from_slice(&77u32.to_le_bytes());
        expected.extend_from_slice(&83u32.to_le_bytes());
        expected.resize(180 + 18 * 4, 0xFF);
        // Next pointer
        expected.extend_from_slice(&[0xFF; 4]);

        assert_eq!(buf, expected);
    }
}
