//! Conservation filtering of merged blocks.
//!
//! Blocks that fail the size limits are dropped. With a percent-identity
//! threshold the block's letters are compared and the block is clipped to its
//! best conserved stretch, or dropped when no stretch qualifies. Target letters
//! of reverse-strand blocks are reverse-complemented so that both sides are
//! indexed in the block's oriented coordinates.

use crate::error::Result;
use crate::sequence_index::SequenceSource;
use crate::slice::{clip_interval_list, AlignmentSlice, BlockMap, GroupByIntervals, MatchInterval, MergedBlock};
use crate::SeqId;
use log::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConservationFilter {
    pub p_identity_min: Option<f64>,
    /// Smallest block (source letters) kept; also the smallest conserved stretch.
    pub min_align_size: Option<i64>,
    pub max_align_size: Option<i64>,
    pub p_aligned_min: Option<f64>,
}

impl ConservationFilter {
    pub fn is_active(&self) -> bool {
        self.p_identity_min.is_some()
            || self.min_align_size.is_some()
            || self.max_align_size.is_some()
            || self.p_aligned_min.is_some()
    }
}

/// An unbroken run of identical letters, with the number of mismatches seen
/// since the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConservedRun {
    pub src: i64,
    pub dest: i64,
    pub len: i64,
    pub mismatches: i64,
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'T' => b'A',
            b'C' => b'G',
            b'G' => b'C',
            b'a' => b't',
            b't' => b'a',
            b'c' => b'g',
            b'g' => b'c',
            other => other,
        })
        .collect()
}

/// Source and target letters of a block, both indexed from the block start.
fn block_letters(
    block: &MergedBlock,
    query_seq: SeqId,
    source: &dyn SequenceSource,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let src = source.fetch_sequence(query_seq, block.src_start, block.src_end)?;
    let target = block.target_interval()?;
    let mut dest = source.fetch_sequence(target.seq, target.start, target.stop)?;
    if target.orientation.is_reverse() {
        dest = reverse_complement(&dest);
    }
    Ok((src, dest))
}

/// Call `visit(src_pos, dest_pos, identical)` for every aligned letter pair.
fn for_each_pair(block: &MergedBlock, src: &[u8], dest: &[u8], mut visit: impl FnMut(i64, i64, bool)) {
    for m in block.matches() {
        let isrc = m.src_start - block.src_start;
        let idest = m.target_start - block.target_start;
        for i in 0..(m.src_end - m.src_start) {
            let (Some(a), Some(b)) = (
                src.get((isrc + i) as usize),
                dest.get((idest + i) as usize),
            ) else {
                break;
            };
            visit(
                m.src_start + i,
                m.target_start + i,
                a.eq_ignore_ascii_case(b),
            );
        }
    }
}

/// Fraction of identical letters over the block length.
pub fn p_identity(block: &MergedBlock, query_seq: SeqId, source: &dyn SequenceSource) -> Result<f64> {
    let (src, dest) = block_letters(block, query_seq, source)?;
    let mut identical = 0i64;
    for_each_pair(block, &src, &dest, |_, _, same| {
        if same {
            identical += 1;
        }
    });
    Ok(identical as f64 / block.length() as f64)
}

pub fn conserved_runs(block: &MergedBlock, src: &[u8], dest: &[u8]) -> Vec<ConservedRun> {
    let mut runs = Vec::new();
    let mut open: Option<ConservedRun> = None;
    let mut mismatches = 0;
    for_each_pair(block, src, dest, |s, d, same| {
        if !same {
            if let Some(run) = open.take() {
                runs.push(run);
                mismatches = 0;
            }
            mismatches += 1;
            return;
        }
        if let Some(run) = open.as_mut() {
            if run.src + run.len == s && run.dest + run.len == d {
                run.len += 1;
                return;
            }
            // identical but not contiguous: a gap or insert breaks the run
            runs.push(*run);
            mismatches = 0;
        }
        open = Some(ConservedRun { src: s, dest: d, len: 1, mismatches });
    });
    runs.extend(open);
    runs
}

/// Longest stretch of consecutive runs whose identity reaches `p_identity_min`,
/// scored by identical plus mismatched letters.
pub fn longest_segment(
    runs: &[ConservedRun],
    p_identity_min: f64,
    min_align_size: i64,
) -> Option<MatchInterval> {
    let mut best: Option<(MatchInterval, i64)> = None;
    for (i, last) in runs.iter().enumerate() {
        let mut identical = 0;
        let mut mismatched = 0;
        for first in runs[..=i].iter().rev() {
            identical += first.len;
            let length = (last.src + last.len - first.src).max(last.dest + last.len - first.dest);
            let p = identical as f64 / length as f64;
            if p >= p_identity_min && best.map_or(true, |(_, score)| identical + mismatched > score) {
                best = Some((
                    MatchInterval::new(first.src, last.src + last.len, first.dest, last.dest + last.len),
                    identical + mismatched,
                ));
            }
            mismatched += first.mismatches;
        }
    }
    best.filter(|(_, score)| *score >= min_align_size)
        .map(|(segment, _)| segment)
}

pub fn conserved_segment(
    block: &MergedBlock,
    query_seq: SeqId,
    source: &dyn SequenceSource,
    p_identity_min: f64,
    min_align_size: i64,
) -> Result<Option<MatchInterval>> {
    let (src, dest) = block_letters(block, query_seq, source)?;
    let runs = conserved_runs(block, &src, &dest);
    Ok(longest_segment(&runs, p_identity_min, min_align_size))
}

fn filter_block(
    block: MergedBlock,
    query_seq: SeqId,
    source: &dyn SequenceSource,
    filter: &ConservationFilter,
) -> Result<Option<MergedBlock>> {
    let size = block.src_end - block.src_start;
    if filter.min_align_size.is_some_and(|min| size < min)
        || filter.max_align_size.is_some_and(|max| size > max)
    {
        return Ok(None);
    }
    if filter.p_aligned_min.is_some_and(|min| block.p_aligned() < min) {
        return Ok(None);
    }
    let Some(p_identity_min) = filter.p_identity_min else {
        return Ok(Some(block));
    };
    let min_align_size = filter.min_align_size.unwrap_or(1);
    let Some(kept) = conserved_segment(&block, query_seq, source, p_identity_min, min_align_size)? else {
        return Ok(None);
    };
    Ok(Some(MergedBlock {
        target: block.target,
        src_start: kept.src_start,
        src_end: kept.src_end,
        target_start: kept.target_start,
        target_end: kept.target_end,
        sub_intervals: clip_interval_list(
            Some(kept.src_start),
            Some(kept.src_end),
            block.sub_intervals.as_deref(),
        ),
    }))
}

/// Drop or clip blocks failing `filter`; targets left without blocks are removed.
pub fn filter_by_conservation(
    blocks: BlockMap,
    query_seq: SeqId,
    source: &dyn SequenceSource,
    filter: &ConservationFilter,
) -> Result<BlockMap> {
    let mut kept = BlockMap::new();
    for (key, list) in blocks {
        let before = list.len();
        let mut survivors = Vec::with_capacity(before);
        for block in list {
            if let Some(block) = filter_block(block, query_seq, source, filter)? {
                survivors.push(block);
            }
        }
        debug!(
            "Conservation filter kept {} of {} blocks on {}",
            survivors.len(),
            before,
            key.seq
        );
        if !survivors.is_empty() {
            kept.insert(key, survivors);
        }
    }
    Ok(kept)
}

impl AlignmentSlice<'_> {
    /// Horizontal group-by followed by the conservation filter.
    pub fn group_by_intervals_conserved(
        &self,
        intervals: &GroupByIntervals,
        filter: &ConservationFilter,
        source: &dyn SequenceSource,
    ) -> Result<BlockMap> {
        let blocks = self.group_by_intervals(intervals)?;
        if !filter.is_active() {
            return Ok(blocks);
        }
        filter_by_conservation(blocks, self.query().seq, source, filter)
    }
}
