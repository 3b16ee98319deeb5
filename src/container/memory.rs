use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use crate::record::RecordId;

use super::error::{ContainerError, ContainerResult};
use super::stats::{GramMeasure, StatsCollector};
use super::{
    DELETED_STRING_ID, PhysOrd, StringContainer, StringId, read_lines, reorg_plan,
};

/// In-memory string container. Mirrors the disk container's interface so
/// callers can stage, reorganize, and test against it without touching
/// disk; strings live in a plain vector and ids index into it.
pub struct MemoryContainer {
    strings: Vec<String>,
    phys_ord: PhysOrd,
    gather_stats: bool,
    stats: StatsCollector,
}

impl MemoryContainer {
    pub fn new(phys_ord: PhysOrd, gather_stats: bool) -> Self {
        Self {
            strings: Vec::new(),
            phys_ord,
            gather_stats,
            stats: StatsCollector::new(),
        }
    }

    pub fn set_gram_measure(&mut self, gram: Box<dyn GramMeasure>) {
        self.stats.set_gram_measure(gram);
    }

    /// Bulk-loads `strings`, applying this container's physical order.
    /// Ordered loads stage into a scratch container first and then copy
    /// in sorted order.
    pub fn fill<I>(&mut self, strings: I) -> ContainerResult<()>
    where
        I: IntoIterator<Item = String>,
    {
        if self.phys_ord == PhysOrd::None {
            if self.gather_stats {
                self.stats.begin();
            }
            for s in strings {
                if self.gather_stats {
                    self.stats.next(&s);
                }
                self.insert_string(&s)?;
            }
            if self.gather_stats {
                self.stats.end();
            }
            return Ok(());
        }

        let mut scratch = MemoryContainer::new(PhysOrd::None, false);
        if self.gather_stats {
            self.stats.begin();
        }
        for s in strings {
            if self.gather_stats {
                self.stats.next(&s);
            }
            scratch.insert_string(&s)?;
        }
        if self.gather_stats {
            self.stats.end();
        }
        self.copy_reorg(&mut scratch)
    }

    /// Bulk-loads `count` lines from a text file (0 loads them all),
    /// skipping lines longer than `max_line_len`.
    pub fn fill_from_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        count: u32,
        max_line_len: usize,
    ) -> ContainerResult<()> {
        let strings = read_lines(path.as_ref(), count, max_line_len)?;
        self.fill(strings)
    }

    /// Copies every string out of `src` in this container's physical
    /// order, re-gathering statistics over the final order.
    pub fn copy_reorg<C: StringContainer>(&mut self, src: &mut C) -> ContainerResult<()> {
        let order = reorg_plan(src, self.phys_ord, &self.stats)?;
        if self.gather_stats {
            self.stats.begin();
        }
        for id in order {
            let s = src.retrieve_string(id)?;
            if self.gather_stats {
                self.stats.next(&s);
            }
            self.insert_string(&s)?;
        }
        if self.gather_stats {
            self.stats.end();
        }
        Ok(())
    }
}

impl StringContainer for MemoryContainer {
    fn insert_string(&mut self, s: &str) -> ContainerResult<StringId> {
        let id = self.strings.len() as StringId;
        self.strings.push(s.to_owned());
        Ok(id)
    }

    fn retrieve_string(&mut self, id: StringId) -> ContainerResult<String> {
        self.strings
            .get(id as usize)
            .cloned()
            .ok_or(ContainerError::InvalidStringId(id))
    }

    fn size(&self) -> u32 {
        self.strings.len() as u32
    }

    fn flush(&mut self) -> ContainerResult<()> {
        Ok(())
    }

    fn record_id(&self, _id: StringId) -> Option<RecordId> {
        warn!("memory containers do not keep record ids");
        None
    }

    fn integrate_updates(&mut self, deleted: &HashSet<StringId>) -> ContainerResult<Vec<StringId>> {
        let old = std::mem::take(&mut self.strings);
        let mut mapping = vec![DELETED_STRING_ID; old.len()];
        let mut kept = Vec::with_capacity(old.len().saturating_sub(deleted.len()));
        for (id, s) in old.into_iter().enumerate() {
            if deleted.contains(&(id as StringId)) {
                continue;
            }
            mapping[id] = kept.len() as StringId;
            kept.push(s);
        }
        self.strings = kept;
        Ok(mapping)
    }

    fn phys_ord(&self) -> PhysOrd {
        self.phys_ord
    }

    fn stats(&self) -> Option<&StatsCollector> {
        self.gather_stats.then_some(&self.stats)
    }
}
