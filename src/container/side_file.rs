//! Serialization of the rid-map side file.
//!
//! The side file sits next to the collection file and carries everything
//! the collection blocks do not: the string-id to record-id map, whether
//! statistics were gathered, and the statistics themselves. All integers
//! are little-endian; the layout is
//!
//! ```text
//! [rid count: u32] [block: u32, slot: u32]...
//! [gather flag: u8]
//! [avg len: f32] [count: u32] [min len: u32] [max len: u32]
//! [char freq: u32] x 256
//! [filter count: u32] [filter, min key: u32, max key: u32, wavg: f32]...
//! ```
//!
//! The statistics section is always present; a collection that never
//! gathered any simply stores zeros.

use crate::record::RecordId;

use super::error::{ContainerError, ContainerResult};
use super::stats::StatsCollector;

/// Bounds-checked cursor over the raw side file bytes.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> ContainerResult<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(ContainerError::CorruptSideFile(format!(
                "unexpected end of data at byte {}",
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> ContainerResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> ContainerResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_f32(&mut self) -> ContainerResult<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

pub(crate) fn encode(rid_map: &[RecordId], gather_stats: bool, stats: &StatsCollector) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + rid_map.len() * 8 + 1 + 16 + 256 * 4 + 4);
    out.extend_from_slice(&(rid_map.len() as u32).to_le_bytes());
    for rid in rid_map {
        out.extend_from_slice(&rid.block.to_le_bytes());
        out.extend_from_slice(&rid.slot.to_le_bytes());
    }
    out.push(u8::from(gather_stats));
    stats.write_to(&mut out);
    out
}

pub(crate) fn decode(bytes: &[u8]) -> ContainerResult<(Vec<RecordId>, bool, StatsCollector)> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u32()? as usize;
    if count * 8 > reader.remaining() {
        return Err(ContainerError::CorruptSideFile(format!(
            "rid count {count} exceeds file size"
        )));
    }
    let mut rid_map = Vec::with_capacity(count);
    for _ in 0..count {
        let block = reader.read_u32()?;
        let slot = reader.read_u32()?;
        rid_map.push(RecordId { block, slot });
    }
    let gather_stats = match reader.read_u8()? {
        0 => false,
        1 => true,
        v => {
            return Err(ContainerError::CorruptSideFile(format!(
                "invalid stats flag {v}"
            )));
        }
    };
    let stats = StatsCollector::read_from(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(ContainerError::CorruptSideFile(format!(
            "{} trailing bytes after statistics",
            reader.remaining()
        )));
    }
    Ok((rid_map, gather_stats, stats))
}
