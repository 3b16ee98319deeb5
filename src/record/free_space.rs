use std::collections::BTreeMap;

use crate::file::BlockId;

/// Default bound on tracked blocks
pub const DEFAULT_FSM_MAX_ENTRIES: usize = 2000;

/// Bounded in-memory sample of per-block free space.
///
/// Tracks up to `max_entries` blocks with their usable payload bytes,
/// ordered by block number so placement is deterministic first-fit.
/// The sample is never persisted; a block that is not tracked is assumed
/// full. When the sample is at capacity, a candidate is admitted only if
/// its free space beats the current average and some below-average entry
/// can make room for it.
#[derive(Debug)]
pub struct FreeSpaceManager {
    entries: BTreeMap<BlockId, u32>,
    total_free: u64,
    max_entries: usize,
}

impl FreeSpaceManager {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            total_free: 0,
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that `block` has `free` usable bytes. Existing entries are
    /// updated in place; new ones compete for admission once the sample
    /// is full.
    pub fn insert(&mut self, block: BlockId, free: u32) {
        if let Some(slot) = self.entries.get_mut(&block) {
            self.total_free = self.total_free - *slot as u64 + free as u64;
            *slot = free;
            return;
        }

        if self.entries.len() < self.max_entries {
            self.entries.insert(block, free);
            self.total_free += free as u64;
            return;
        }

        let average = self.total_free / self.entries.len() as u64;
        if free as u64 <= average {
            return;
        }
        // Evict the first below-average entry; if every entry is at or
        // above average the candidate is dropped instead.
        let victim = self
            .entries
            .iter()
            .find(|&(_, &f)| (f as u64) < average)
            .map(|(&b, &f)| (b, f));
        if let Some((victim_block, victim_free)) = victim {
            self.entries.remove(&victim_block);
            self.total_free -= victim_free as u64;
            self.entries.insert(block, free);
            self.total_free += free as u64;
        }
    }

    /// Lowest-numbered tracked block with at least `needed` free bytes.
    pub fn block_with_space(&self, needed: u32) -> Option<BlockId> {
        self.entries
            .iter()
            .find(|&(_, &free)| free >= needed)
            .map(|(&block, _)| block)
    }

    /// Tracked free space of `block`, if sampled.
    #[cfg(test)]
    fn tracked(&self, block: BlockId) -> Option<u32> {
        self.entries.get(&block).copied()
    }
}

impl Default for FreeSpaceManager {
    fn default() -> Self {
        Self::new(DEFAULT_FSM_MAX_ENTRIES)
    }
}
