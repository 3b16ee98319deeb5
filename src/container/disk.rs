use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::record::{RECORD_HEADER_SIZE, RecordId, StoreConfig, StringStore};

use super::error::{ContainerError, ContainerResult};
use super::side_file;
use super::stats::{GramMeasure, StatsCollector};
use super::{PhysOrd, StringContainer, StringId, read_lines, reorg_plan};

/// Disk-backed string container.
///
/// Strings live as records in a [`StringStore`]; the dense string-id to
/// record-id map and the gathered statistics live in a side file named
/// `ridmap_<name>` next to the collection file. The map is loaded whole
/// on open and written back on flush and on drop.
pub struct DiskContainer {
    store: StringStore,
    rid_map: Vec<RecordId>,
    side_path: PathBuf,
    phys_ord: PhysOrd,
    gather_stats: bool,
    stats: StatsCollector,
}

/// `ridmap_<name>` in the same directory as the collection file.
fn side_file_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    path.with_file_name(format!("ridmap_{name}"))
}

impl DiskContainer {
    /// Creates an empty container on disk: the collection file and its
    /// side file. The container is not left open.
    pub fn create<P: AsRef<Path>>(
        path: P,
        config: &StoreConfig,
        gather_stats: bool,
    ) -> ContainerResult<()> {
        StringStore::create(&path, config)?;
        let side_path = side_file_path(path.as_ref());
        let bytes = side_file::encode(&[], gather_stats, &StatsCollector::new());
        fs::write(&side_path, bytes)?;
        Ok(())
    }

    /// Opens an existing container. Whether statistics are gathered was
    /// fixed at creation and comes from the side file; the physical order
    /// only matters for subsequent fills and is chosen per open.
    pub fn open<P: AsRef<Path>>(path: P, phys_ord: PhysOrd) -> ContainerResult<Self> {
        let store = StringStore::open(&path)?;
        let side_path = side_file_path(path.as_ref());
        let bytes = fs::read(&side_path).map_err(|source| ContainerError::OpenFailed {
            path: side_path.display().to_string(),
            source,
        })?;
        let (rid_map, gather_stats, stats) = side_file::decode(&bytes)?;
        Ok(Self {
            store,
            rid_map,
            side_path,
            phys_ord,
            gather_stats,
            stats,
        })
    }

    pub fn create_and_open<P: AsRef<Path>>(
        path: P,
        config: &StoreConfig,
        phys_ord: PhysOrd,
        gather_stats: bool,
    ) -> ContainerResult<Self> {
        Self::create(&path, config, gather_stats)?;
        Self::open(path, phys_ord)
    }

    pub fn set_gram_measure(&mut self, gram: Box<dyn GramMeasure>) {
        self.stats.set_gram_measure(gram);
    }

    /// Whether the block holding `id` is resident in the buffer cache.
    pub fn in_cache(&self, id: StringId) -> bool {
        self.rid_map
            .get(id as usize)
            .is_some_and(|rid| self.store.in_cache(rid.block))
    }

    /// Bulk-loads `strings`, applying this container's physical order.
    ///
    /// An unordered load inserts straight into the store. An ordered load
    /// stages into a scratch container in a temporary directory first,
    /// gathers statistics while staging, and then copies everything over
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

        let scratch_dir = tempfile::tempdir()?;
        let scratch_path = scratch_dir.path().join("reorg_staging.rm");
        let mut scratch =
            DiskContainer::create_and_open(&scratch_path, &self.scratch_config(), PhysOrd::None, false)?;
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

    /// Store geometry for a scratch container matching this one. The
    /// average string length is not persisted, so it is recovered from
    /// the dictionary slot count.
    fn scratch_config(&self) -> StoreConfig {
        let header = self.store.header();
        StoreConfig {
            block_size: header.block_size,
            avg_str_len: (header.block_size / header.num_dict_slots)
                .saturating_sub(RECORD_HEADER_SIZE as u32)
                .max(1),
            buffer_slots: header.buffer_slots,
        }
    }

    fn write_side_file(&self) -> ContainerResult<()> {
        let bytes = side_file::encode(&self.rid_map, self.gather_stats, &self.stats);
        fs::write(&self.side_path, bytes)?;
        Ok(())
    }
}

impl StringContainer for DiskContainer {
    fn insert_string(&mut self, s: &str) -> ContainerResult<StringId> {
        let rid = self.store.insert(s.as_bytes())?;
        let id = self.rid_map.len() as StringId;
        self.rid_map.push(rid);
        Ok(id)
    }

    fn retrieve_string(&mut self, id: StringId) -> ContainerResult<String> {
        let rid = *self
            .rid_map
            .get(id as usize)
            .ok_or(ContainerError::InvalidStringId(id))?;
        let bytes = self.store.retrieve(rid)?;
        String::from_utf8(bytes).map_err(|_| ContainerError::CorruptRecord(id))
    }

    fn size(&self) -> u32 {
        self.rid_map.len() as u32
    }

    fn flush(&mut self) -> ContainerResult<()> {
        self.store.flush()?;
        self.write_side_file()
    }

    fn record_id(&self, id: StringId) -> Option<RecordId> {
        self.rid_map.get(id as usize).copied()
    }

    fn integrate_updates(&mut self, _deleted: &HashSet<StringId>) -> ContainerResult<Vec<StringId>> {
        warn!("disk containers do not support compacting deletions");
        Err(ContainerError::UnsupportedOperation(
            "compacting deletions in a disk container",
        ))
    }

    fn phys_ord(&self) -> PhysOrd {
        self.phys_ord
    }

    fn stats(&self) -> Option<&StatsCollector> {
        self.gather_stats.then_some(&self.stats)
    }
}

impl Drop for DiskContainer {
    fn drop(&mut self) {
        // The store flushes itself on drop; the side file is ours.
        let _ = self.write_side_file();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn small_config() -> StoreConfig {
        StoreConfig {
            block_size: 256,
            avg_str_len: 10,
            buffer_slots: 4,
        }
    }

    fn setup_container(dir: &TempDir, phys_ord: PhysOrd, gather_stats: bool) -> DiskContainer {
        let path = dir.path().join("strings.rm");
        DiskContainer::create_and_open(&path, &small_config(), phys_ord, gather_stats).unwrap()
    }

    fn retrieve_all(container: &mut DiskContainer) -> Vec<String> {
        (0..container.size())
            .map(|id| container.retrieve_string(id).unwrap())
            .collect()
    }

    #[test]
    fn test_create_writes_collection_and_side_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.rm");
        DiskContainer::create(&path, &small_config(), false).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 2 * 256);
        let side = side_file_path(&path);
        assert_eq!(fs::metadata(&side).unwrap().len(), 1049);
    }

    #[test]
    fn test_insert_retrieve_and_record_ids() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::None, false);

        assert_eq!(container.insert_string("alpha").unwrap(), 0);
        assert_eq!(container.insert_string("beta").unwrap(), 1);
        assert_eq!(container.size(), 2);
        assert_eq!(container.retrieve_string(0).unwrap(), "alpha");
        assert_eq!(container.retrieve_string(1).unwrap(), "beta");
        assert_eq!(container.record_id(0), Some(RecordId { block: 1, slot: 0 }));
        assert_eq!(container.record_id(1), Some(RecordId { block: 1, slot: 1 }));
        assert_eq!(container.record_id(2), None);
        assert!(matches!(
            container.retrieve_string(9),
            Err(ContainerError::InvalidStringId(9))
        ));
    }

    #[test]
    fn test_reopen_restores_rid_map_after_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.rm");
        {
            let mut container =
                DiskContainer::create_and_open(&path, &small_config(), PhysOrd::None, false)
                    .unwrap();
            container.insert_string("persisted").unwrap();
            container.insert_string("strings").unwrap();
        }

        let mut reopened = DiskContainer::open(&path, PhysOrd::None).unwrap();
        assert_eq!(reopened.size(), 2);
        assert_eq!(reopened.retrieve_string(0).unwrap(), "persisted");
        assert_eq!(reopened.retrieve_string(1).unwrap(), "strings");
        assert!(reopened.stats().is_none());
    }

    #[test]
    fn test_fill_spans_blocks() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::None, false);

        let strings: Vec<String> = (0..30).map(|i| format!("string{i:04}")).collect();
        container.fill(strings.clone()).unwrap();

        assert_eq!(container.size(), 30);
        assert_eq!(retrieve_all(&mut container), strings);
        let last = container.record_id(29).unwrap();
        assert!(last.block > 1);
    }

    #[test]
    fn test_fill_stats_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.rm");
        {
            let mut container =
                DiskContainer::create_and_open(&path, &small_config(), PhysOrd::None, true)
                    .unwrap();
            container
                .fill(["ab", "abcd", "x"].map(String::from))
                .unwrap();
            let stats = container.stats().unwrap();
            assert_eq!(stats.str_count(), 3);
        }

        let reopened = DiskContainer::open(&path, PhysOrd::None).unwrap();
        let stats = reopened.stats().unwrap();
        assert_eq!(stats.str_count(), 3);
        assert_eq!(stats.min_str_len(), 1);
        assert_eq!(stats.max_str_len(), 4);
        assert!((stats.avg_str_len() - 7.0 / 3.0).abs() < 1e-6);
        assert_eq!(stats.filter_stats().len(), 2);
    }

    #[test]
    fn test_fill_orders_by_length() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::Length, false);
        container
            .fill(["ccc", "a", "bb"].map(String::from))
            .unwrap();
        assert_eq!(retrieve_all(&mut container), ["a", "bb", "ccc"]);
    }

    #[test]
    fn test_fill_orders_by_charsum() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::Charsum, false);
        // Charsums: b = 98, z = 122, aa = 194.
        container
            .fill(["aa", "b", "z"].map(String::from))
            .unwrap();
        assert_eq!(retrieve_all(&mut container), ["b", "z", "aa"]);
    }

    #[test]
    fn test_fill_auto_orders_by_best_filter() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::Auto, true);

        // Uniform lengths make the length filter useless; the two charsum
        // clusters sit further apart than one window, so automatic
        // ordering goes charsum first.
        let mut strings = Vec::new();
        for _ in 0..10 {
            strings.push("zzzzzz".to_owned());
            strings.push("aaaaaa".to_owned());
        }
        container.fill(strings).unwrap();

        let all = retrieve_all(&mut container);
        assert!(all[..10].iter().all(|s| s == "aaaaaa"));
        assert!(all[10..].iter().all(|s| s == "zzzzzz"));
        assert_eq!(container.stats().unwrap().str_count(), 20);
    }

    #[test]
    fn test_fill_auto_without_stats_keeps_input_order() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::Auto, false);
        container
            .fill(["ccc", "a", "bb"].map(String::from))
            .unwrap();
        assert_eq!(retrieve_all(&mut container), ["ccc", "a", "bb"]);
    }

    #[test]
    fn test_fill_from_file_applies_order() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "ccc\na\nbb\n").unwrap();

        let mut container = setup_container(&dir, PhysOrd::Length, false);
        container
            .fill_from_file(&input, 0, crate::container::DEFAULT_MAX_LINE_LEN)
            .unwrap();
        assert_eq!(retrieve_all(&mut container), ["a", "bb", "ccc"]);
    }

    #[test]
    fn test_integrate_updates_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::None, false);
        container.insert_string("keep").unwrap();

        let deleted = HashSet::from([0]);
        assert!(matches!(
            container.integrate_updates(&deleted),
            Err(ContainerError::UnsupportedOperation(_))
        ));
        assert_eq!(container.size(), 1);
        assert_eq!(container.retrieve_string(0).unwrap(), "keep");
    }

    #[test]
    fn test_in_cache_tracks_buffered_blocks() {
        let dir = TempDir::new().unwrap();
        let mut container = setup_container(&dir, PhysOrd::None, false);
        container.insert_string("cached").unwrap();
        assert!(container.in_cache(0));
        assert!(!container.in_cache(1));
    }

    #[test]
    fn test_open_without_side_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.rm");
        DiskContainer::create(&path, &small_config(), false).unwrap();
        fs::remove_file(side_file_path(&path)).unwrap();

        assert!(matches!(
            DiskContainer::open(&path, PhysOrd::None),
            Err(ContainerError::OpenFailed { .. })
        ));
    }

    #[test]
    fn test_open_with_corrupt_side_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.rm");
        DiskContainer::create(&path, &small_config(), false).unwrap();
        let side = side_file_path(&path);
        let bytes = fs::read(&side).unwrap();
        fs::write(&side, &bytes[..20]).unwrap();

        assert!(matches!(
            DiskContainer::open(&path, PhysOrd::None),
            Err(ContainerError::CorruptSideFile(_))
        ));
    }

    #[test]
    fn test_copy_reorg_from_memory_container() {
        let dir = TempDir::new().unwrap();
        let mut src = crate::container::MemoryContainer::new(PhysOrd::None, false);
        for s in ["ccc", "a", "bb"] {
            src.insert_string(s).unwrap();
        }

        let mut container = setup_container(&dir, PhysOrd::Length, false);
        container.copy_reorg(&mut src).unwrap();
        assert_eq!(retrieve_all(&mut container), ["a", "bb", "ccc"]);
    }
}
