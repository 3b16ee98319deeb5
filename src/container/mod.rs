mod disk;
mod error;
mod memory;
mod side_file;
mod stats;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use crate::record::RecordId;

pub use disk::DiskContainer;
pub use error::{ContainerError, ContainerResult};
pub use memory::MemoryContainer;
pub use stats::{
    DEFAULT_MAX_CHAR, FilterKind, FilterStats, FilterType, GramMeasure, StatsCollector, charsum,
};

/// Dense index of a string within a container, assigned in insertion
/// order starting at 0.
pub type StringId = u32;

/// Mapping value for a string removed by `integrate_updates`.
pub const DELETED_STRING_ID: StringId = u32::MAX;

/// Default longest line accepted when filling from a text file.
pub const DEFAULT_MAX_LINE_LEN: usize = 300;

/// Physical placement order applied while bulk-loading a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysOrd {
    /// Keep the input order.
    #[default]
    None,
    /// Pick the order from gathered statistics.
    Auto,
    Length,
    Charsum,
    LengthCharsum,
    CharsumLength,
}

/// Common interface of the string containers.
///
/// `retrieve_string` takes `&mut self` because disk-backed containers
/// fault blocks through their buffer cache on reads.
pub trait StringContainer {
    fn insert_string(&mut self, s: &str) -> ContainerResult<StringId>;

    fn retrieve_string(&mut self, id: StringId) -> ContainerResult<String>;

    /// Number of strings stored.
    fn size(&self) -> u32;

    fn flush(&mut self) -> ContainerResult<()>;

    /// Record address of `id`, for containers that keep their strings in
    /// records.
    fn record_id(&self, id: StringId) -> Option<RecordId>;

    /// Removes the `deleted` ids and compacts the survivors, keeping their
    /// relative order. Returns the old-to-new id mapping, with
    /// [`DELETED_STRING_ID`] marking removed entries.
    fn integrate_updates(&mut self, deleted: &HashSet<StringId>) -> ContainerResult<Vec<StringId>>;

    fn phys_ord(&self) -> PhysOrd;

    /// Gathered statistics, when gathering is enabled.
    fn stats(&self) -> Option<&StatsCollector>;
}

/// Sort keys of one string during a reorganizing copy.
#[derive(Debug, Clone, Copy)]
struct StringAttribs {
    id: StringId,
    length: u32,
    charsum: u32,
}

fn string_attribs(id: StringId, s: &str, gram: Option<&dyn GramMeasure>) -> StringAttribs {
    StringAttribs {
        id,
        length: match gram {
            Some(g) => g.length_key(s),
            None => s.len() as u32,
        },
        charsum: charsum(s, DEFAULT_MAX_CHAR, None),
    }
}

/// Sorts `attribs` for `ord`, resolving `Auto` through the best
/// partitioning filter. Sorts are stable, so ties keep input order.
fn sort_for_order(attribs: &mut [StringAttribs], ord: PhysOrd, best: Option<FilterType>) -> PhysOrd {
    let effective = match ord {
        PhysOrd::Auto => match best {
            Some(FilterType::Length) => PhysOrd::LengthCharsum,
            Some(FilterType::Charsum) => PhysOrd::CharsumLength,
            _ => {
                warn!("no statistics to resolve automatic ordering, keeping input order");
                PhysOrd::None
            }
        },
        other => other,
    };
    match effective {
        PhysOrd::None | PhysOrd::Auto => {}
        PhysOrd::Length => attribs.sort_by_key(|a| a.length),
        PhysOrd::Charsum => attribs.sort_by_key(|a| a.charsum),
        PhysOrd::LengthCharsum => attribs.sort_by_key(|a| (a.length, a.charsum)),
        PhysOrd::CharsumLength => attribs.sort_by_key(|a| (a.charsum, a.length)),
    }
    effective
}

/// The order in which to copy strings out of `src` so the destination
/// ends up physically ordered by `ord`.
fn reorg_plan<S>(src: &mut S, ord: PhysOrd, stats: &StatsCollector) -> ContainerResult<Vec<StringId>>
where
    S: StringContainer + ?Sized,
{
    let size = src.size();
    let mut attribs = Vec::with_capacity(size as usize);
    for id in 0..size {
        let s = src.retrieve_string(id)?;
        attribs.push(string_attribs(id, &s, stats.gram_measure()));
    }
    let best = stats.best_part_filter().map(|f| f.filter_type());
    sort_for_order(&mut attribs, ord, best);
    Ok(attribs.into_iter().map(|a| a.id).collect())
}

/// Reads up to `count` lines from a text file, skipping lines longer than
/// `max_line_len`. A count of 0 reads the whole file.
fn read_lines(path: &Path, count: u32, max_line_len: usize) -> ContainerResult<Vec<String>> {
    let file = File::open(path).map_err(|source| ContainerError::OpenFailed {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut strings = Vec::new();
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.len() > max_line_len {
            skipped += 1;
            continue;
        }
        strings.push(line);
        if count != 0 && strings.len() as u32 == count {
            break;
        }
    }
    if skipped > 0 {
        warn!(skipped, max_line_len, "skipped lines over the length limit");
    }
    Ok(strings)
}
