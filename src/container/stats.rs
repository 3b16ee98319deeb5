//! String statistics gathered during bulk loads.
//!
//! A collector tracks length extremes, character frequencies, and the key
//! distribution of each candidate partitioning filter, summarized as the
//! weighted average population of a sliding similarity window. The filter
//! with the smallest weighted average spreads strings best and is the one
//! automatic physical ordering picks.

use std::cmp::Ordering;

use ahash::AHashMap;

use super::error::{ContainerError, ContainerResult};
use super::side_file::ByteReader;

/// Largest byte value that contributes fully to a character sum.
pub const DEFAULT_MAX_CHAR: u8 = 127;

/// Wire codes for the persisted filter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None = 0,
    Length = 1,
    Charsum = 2,
}

/// A partitioning filter, persisted alongside its key statistics.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    Length {
        max_str_len: u32,
        max_key: u32,
    },
    Charsum {
        max_str_len: u32,
        max_char: u8,
        max_key: u32,
        /// Optional byte remapping applied before capping at `max_char`.
        char_map: Option<Box<[u8; 256]>>,
    },
}

impl FilterKind {
    pub fn length() -> Self {
        FilterKind::Length {
            max_str_len: 0,
            max_key: 0,
        }
    }

    pub fn charsum() -> Self {
        FilterKind::Charsum {
            max_str_len: 0,
            max_char: DEFAULT_MAX_CHAR,
            max_key: 0,
            char_map: None,
        }
    }

    pub fn filter_type(&self) -> FilterType {
        match self {
            FilterKind::Length { .. } => FilterType::Length,
            FilterKind::Charsum { .. } => FilterType::Charsum,
        }
    }

    /// Partitioning key of `s` under this filter.
    pub fn key(&self, s: &str, gram: Option<&dyn GramMeasure>) -> u32 {
        match self {
            FilterKind::Length { .. } => match gram {
                Some(g) => g.length_key(s),
                None => s.len() as u32,
            },
            FilterKind::Charsum {
                max_char, char_map, ..
            } => charsum(s, *max_char, char_map.as_deref()),
        }
    }

    /// Width of one edit unit in key space. An edit changes a string's
    /// length key by at most one and its charsum by at most `max_char`.
    fn window_unit(&self) -> f32 {
        match self {
            FilterKind::Length { .. } => 1.0,
            FilterKind::Charsum { max_char, .. } => f32::from(*max_char),
        }
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            FilterKind::Length {
                max_str_len,
                max_key,
            } => {
                out.extend_from_slice(&(FilterType::Length as u32).to_le_bytes());
                out.extend_from_slice(&max_str_len.to_le_bytes());
                out.extend_from_slice(&max_key.to_le_bytes());
            }
            FilterKind::Charsum {
                max_str_len,
                max_char,
                max_key,
                char_map,
            } => {
                out.extend_from_slice(&(FilterType::Charsum as u32).to_le_bytes());
                out.extend_from_slice(&max_str_len.to_le_bytes());
                out.push(*max_char);
                out.extend_from_slice(&max_key.to_le_bytes());
                match char_map {
                    Some(map) => {
                        out.extend_from_slice(&(map.len() as u32).to_le_bytes());
                        out.extend_from_slice(map.as_slice());
                    }
                    None => out.extend_from_slice(&0u32.to_le_bytes()),
                }
            }
        }
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> ContainerResult<Self> {
        let code = reader.read_u32()?;
        match code {
            1 => Ok(FilterKind::Length {
                max_str_len: reader.read_u32()?,
                max_key: reader.read_u32()?,
            }),
            2 => {
                let max_str_len = reader.read_u32()?;
                let max_char = reader.read_u8()?;
                let max_key = reader.read_u32()?;
                let char_map = match reader.read_u32()? {
                    0 => None,
                    256 => {
                        let mut map = Box::new([0u8; 256]);
                        map.copy_from_slice(reader.take(256)?);
                        Some(map)
                    }
                    n => {
                        return Err(ContainerError::CorruptSideFile(format!(
                            "invalid char map size {n}"
                        )));
                    }
                };
                Ok(FilterKind::Charsum {
                    max_str_len,
                    max_char,
                    max_key,
                    char_map,
                })
            }
            code => Err(ContainerError::CorruptSideFile(format!(
                "unknown filter type {code}"
            ))),
        }
    }
}

/// Character sum of `s`: every byte, optionally remapped through
/// `char_map`, contributes its value capped at `max_char`.
pub fn charsum(s: &str, max_char: u8, char_map: Option<&[u8; 256]>) -> u32 {
    s.bytes()
        .map(|b| {
            let c = match char_map {
                Some(map) => map[b as usize],
                None => b,
            };
            u32::from(c.min(max_char))
        })
        .sum()
}

/// Measurement hook supplied by a gram-generation front end.
///
/// The storage layer treats strings as opaque bytes; index layers measure
/// them in gram units instead. Only two measurements matter for statistics:
/// the length key of a string and whether character sums carry any signal
/// for the gram type in use (they do not for word tokens).
pub trait GramMeasure {
    /// Length key of `s`, e.g. its gram count.
    fn length_key(&self, s: &str) -> u32;

    /// Whether character sums are meaningful for this gram type.
    fn charsum_meaningful(&self) -> bool {
        true
    }
}

/// Key distribution of one filter over a collection.
#[derive(Debug, Clone)]
pub struct FilterStats {
    filter: FilterKind,
    min_key: u32,
    max_key: u32,
    wted_avg_val_count: f32,
    counts: AHashMap<u32, u32>,
}

impl FilterStats {
    fn new(filter: FilterKind) -> Self {
        Self {
            filter,
            min_key: u32::MAX,
            max_key: 0,
            wted_avg_val_count: 0.0,
            counts: AHashMap::new(),
        }
    }

    fn from_parts(filter: FilterKind, min_key: u32, max_key: u32, wted_avg_val_count: f32) -> Self {
        Self {
            filter,
            min_key,
            max_key,
            wted_avg_val_count,
            counts: AHashMap::new(),
        }
    }

    pub fn filter(&self) -> &FilterKind {
        &self.filter
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter.filter_type()
    }

    pub fn min_key(&self) -> u32 {
        self.min_key
    }

    pub fn max_key(&self) -> u32 {
        self.max_key
    }

    pub fn wted_avg_val_count(&self) -> f32 {
        self.wted_avg_val_count
    }

    fn observe(&mut self, key: u32) {
        self.min_key = self.min_key.min(key);
        self.max_key = self.max_key.max(key);
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Summarizes the gathered key counts into the weighted average window
    /// population for an edit threshold of `ed`, then drops the counts.
    ///
    /// The window spans `ed * window_unit` keys and slides one key at a
    /// time from the smallest observed key to the largest. Each position
    /// contributes its string count weighted by the fraction of the
    /// collection it covers.
    fn finish(&mut self, ed: f32, str_count: u32) {
        if str_count == 0 || self.counts.is_empty() {
            self.min_key = 0;
            self.max_key = 0;
            self.wted_avg_val_count = 0.0;
            self.counts.clear();
            return;
        }

        let span = (ed * self.filter.window_unit()) as u32;
        let first_hi = self.min_key.saturating_add(span).min(self.max_key);
        let mut val_count: i64 = 0;
        for key in self.min_key..=first_hi {
            val_count += i64::from(self.counts.get(&key).copied().unwrap_or(0));
        }

        let total = str_count as f32;
        let mut weight = val_count as f32 / total;
        let mut total_weight = weight;
        let mut weighted_sum = val_count as f32 * weight;

        // Slide the upper edge one key at a time. The key leaving the
        // window at position `hi` is `hi - span - 1`.
        let lo = u64::from(self.min_key) + u64::from(span);
        for hi in (lo + 1)..=u64::from(self.max_key) {
            let entering = self.counts.get(&(hi as u32)).copied().unwrap_or(0);
            let leaving_key = (hi - u64::from(span) - 1) as u32;
            let leaving = self.counts.get(&leaving_key).copied().unwrap_or(0);
            val_count += i64::from(entering) - i64::from(leaving);
            weight = val_count as f32 / total;
            total_weight += weight;
            weighted_sum += val_count as f32 * weight;
        }

        self.wted_avg_val_count = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        };
        self.counts.clear();
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        self.filter.write_to(out);
        out.extend_from_slice(&self.min_key.to_le_bytes());
        out.extend_from_slice(&self.max_key.to_le_bytes());
        out.extend_from_slice(&self.wted_avg_val_count.to_le_bytes());
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> ContainerResult<Self> {
        let filter = FilterKind::read_from(reader)?;
        let min_key = reader.read_u32()?;
        let max_key = reader.read_u32()?;
        let wted_avg_val_count = reader.read_f32()?;
        Ok(Self::from_parts(filter, min_key, max_key, wted_avg_val_count))
    }
}

/// Collects statistics over one pass of `begin`, `next` for every string,
/// `end`. Between passes the summarized values stay readable; the per-key
/// counts only live during a pass.
pub struct StatsCollector {
    avg_str_len: f32,
    str_count: u32,
    min_str_len: u32,
    max_str_len: u32,
    char_freqs: [u32; 256],
    filter_stats: Vec<FilterStats>,
    gram: Option<Box<dyn GramMeasure>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            avg_str_len: 0.0,
            str_count: 0,
            min_str_len: 0,
            max_str_len: 0,
            char_freqs: [0; 256],
            filter_stats: Vec::new(),
            gram: None,
        }
    }

    pub fn set_gram_measure(&mut self, gram: Box<dyn GramMeasure>) {
        self.gram = Some(gram);
    }

    pub fn gram_measure(&self) -> Option<&dyn GramMeasure> {
        self.gram.as_deref()
    }

    /// Starts a collection pass, resetting all gathered values.
    pub fn begin(&mut self) {
        self.avg_str_len = 0.0;
        self.str_count = 0;
        self.min_str_len = u32::MAX;
        self.max_str_len = 0;
        self.char_freqs = [0; 256];
        self.filter_stats = vec![FilterStats::new(FilterKind::length())];
        if self.gram.as_deref().is_none_or(|g| g.charsum_meaningful()) {
            self.filter_stats.push(FilterStats::new(FilterKind::charsum()));
        }
    }

    pub fn next(&mut self, s: &str) {
        let len = s.len() as u32;
        self.str_count += 1;
        self.avg_str_len += len as f32;
        self.min_str_len = self.min_str_len.min(len);
        self.max_str_len = self.max_str_len.max(len);
        for b in s.bytes() {
            self.char_freqs[b as usize] += 1;
        }
        for stats in &mut self.filter_stats {
            let key = stats.filter.key(s, self.gram.as_deref());
            stats.observe(key);
        }
    }

    /// Ends the pass: turns the length sum into an average and summarizes
    /// every filter for the edit threshold implied by the average length.
    pub fn end(&mut self) {
        if self.str_count == 0 {
            self.avg_str_len = 0.0;
            self.min_str_len = 0;
            for stats in &mut self.filter_stats {
                stats.finish(0.0, 0);
            }
            return;
        }
        self.avg_str_len /= self.str_count as f32;
        let ed = (self.avg_str_len - (self.avg_str_len * 0.85).floor()).trunc();
        for stats in &mut self.filter_stats {
            stats.finish(ed, self.str_count);
        }
    }

    pub fn avg_str_len(&self) -> f32 {
        self.avg_str_len
    }

    pub fn str_count(&self) -> u32 {
        self.str_count
    }

    pub fn min_str_len(&self) -> u32 {
        self.min_str_len
    }

    pub fn max_str_len(&self) -> u32 {
        self.max_str_len
    }

    pub fn char_freqs(&self) -> &[u32; 256] {
        &self.char_freqs
    }

    pub fn filter_stats(&self) -> &[FilterStats] {
        &self.filter_stats
    }

    /// The filter whose windows hold the fewest strings on average, i.e.
    /// the one that partitions this collection best.
    pub fn best_part_filter(&self) -> Option<&FilterStats> {
        self.filter_stats.iter().min_by(|a, b| {
            a.wted_avg_val_count
                .partial_cmp(&b.wted_avg_val_count)
                .unwrap_or(Ordering::Equal)
        })
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.avg_str_len.to_le_bytes());
        out.extend_from_slice(&self.str_count.to_le_bytes());
        out.extend_from_slice(&self.min_str_len.to_le_bytes());
        out.extend_from_slice(&self.max_str_len.to_le_bytes());
        for freq in &self.char_freqs {
            out.extend_from_slice(&freq.to_le_bytes());
        }
        out.extend_from_slice(&(self.filter_stats.len() as u32).to_le_bytes());
        for stats in &self.filter_stats {
            stats.write_to(out);
        }
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> ContainerResult<Self> {
        let avg_str_len = reader.read_f32()?;
        let str_count = reader.read_u32()?;
        let min_str_len = reader.read_u32()?;
        let max_str_len = reader.read_u32()?;
        let mut char_freqs = [0u32; 256];
        for freq in char_freqs.iter_mut() {
            *freq = reader.read_u32()?;
        }
        let filter_count = reader.read_u32()?;
        let mut filter_stats = Vec::new();
        for _ in 0..filter_count {
            filter_stats.push(FilterStats::read_from(reader)?);
        }
        Ok(Self {
            avg_str_len,
            str_count,
            min_str_len,
            max_str_len,
            char_freqs,
            filter_stats,
            gram: None,
        })
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
