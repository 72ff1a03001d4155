//! Alignment slices: everything aligned to one query interval, and the
//! horizontal (`group_by_intervals`) and vertical (`group_by_sequences`)
//! group-by passes that consolidate raw hits into alignment blocks.
//!
//! Target coordinates inside blocks are oriented: a reverse-strand target span
//! `[s, e)` is carried as `(-e, -s)`, so target positions grow with source
//! positions for both strands and gap/insert arithmetic is strand-agnostic.

use crate::alignment_record::IntervalRecord;
use crate::edge::EdgeInfo;
use crate::error::{NlmsaError, Result};
use crate::interval::{Interval, Orientation};
use crate::store::AlignmentStore;
use crate::SeqId;
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub seq: SeqId,
    pub orientation: Orientation,
}

impl TargetKey {
    pub fn of(target: &Interval) -> Self {
        TargetKey {
            seq: target.seq,
            orientation: target.orientation,
        }
    }

    /// `[start, stop)` in this key's oriented coordinates.
    pub fn orient(&self, start: i64, stop: i64) -> (i64, i64) {
        match self.orientation {
            Orientation::Forward => (start, stop),
            Orientation::Reverse => (-stop, -start),
        }
    }
}

/// One 1:1 aligned piece: source span and oriented target span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchInterval {
    pub src_start: i64,
    pub src_end: i64,
    pub target_start: i64,
    pub target_end: i64,
}

impl MatchInterval {
    pub fn new(src_start: i64, src_end: i64, target_start: i64, target_end: i64) -> Self {
        MatchInterval {
            src_start,
            src_end,
            target_start,
            target_end,
        }
    }

    /// Truncate on the source axis, shifting the target by the same amount.
    pub fn clip(&self, start: Option<i64>, end: Option<i64>) -> Option<MatchInterval> {
        let mut m = *self;
        if let Some(s) = start {
            if s > m.src_start {
                m.target_start += s - m.src_start;
                m.src_start = s;
            }
        }
        if let Some(e) = end {
            if e < m.src_end {
                m.target_end -= m.src_end - e;
                m.src_end = e;
            }
        }
        (m.src_start < m.src_end && m.target_start < m.target_end).then_some(m)
    }
}

/// Clip a list of 1:1 pieces to `[start, end)`; fewer than two survivors
/// collapse to `None`, the same as an unsplit block.
pub fn clip_interval_list(
    start: Option<i64>,
    end: Option<i64>,
    list: Option<&[MatchInterval]>,
) -> Option<Vec<MatchInterval>> {
    let clipped: Vec<MatchInterval> = list?
        .iter()
        .filter_map(|m| m.clip(start, end))
        .collect();
    (clipped.len() >= 2).then_some(clipped)
}

/// A run of hits on one target fused by the horizontal group-by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBlock {
    pub target: TargetKey,
    pub src_start: i64,
    pub src_end: i64,
    pub target_start: i64,
    pub target_end: i64,
    /// The 1:1 pieces making up the block, `None` when it is a single piece.
    pub sub_intervals: Option<Vec<MatchInterval>>,
}

impl MergedBlock {
    fn from_match(target: TargetKey, m: MatchInterval) -> Self {
        MergedBlock {
            target,
            src_start: m.src_start,
            src_end: m.src_end,
            target_start: m.target_start,
            target_end: m.target_end,
            sub_intervals: None,
        }
    }

    pub fn bounds(&self) -> MatchInterval {
        MatchInterval::new(
            self.src_start,
            self.src_end,
            self.target_start,
            self.target_end,
        )
    }

    pub fn source(&self, query_seq: SeqId) -> Result<Interval> {
        Interval::new(query_seq, self.src_start, self.src_end)
    }

    pub fn target_interval(&self) -> Result<Interval> {
        Interval::from_oriented(self.target.seq, self.target_start, self.target_end)
    }

    /// 1:1 pieces; a block without sub-intervals is its own single piece.
    pub fn matches(&self) -> Vec<MatchInterval> {
        match &self.sub_intervals {
            Some(list) => list.clone(),
            None => vec![self.bounds()],
        }
    }

    /// `(source gap, target insert)` between consecutive pieces, as oriented
    /// half-open spans; either side is `None` when nothing is skipped there.
    pub fn gaps(&self) -> Vec<(Option<(i64, i64)>, Option<(i64, i64)>)> {
        let list = match &self.sub_intervals {
            Some(list) if list.len() >= 2 => list,
            _ => return Vec::new(),
        };
        let mut src_last = list[0].src_end;
        let mut dest_last = list[0].target_end;
        let mut gaps = Vec::new();
        for m in &list[1..] {
            let src = (m.src_start > src_last).then_some((src_last, m.src_start));
            let dest = (m.target_start > dest_last).then_some((dest_last, m.target_start));
            if src.is_some() || dest.is_some() {
                gaps.push((src, dest));
            }
            src_last = m.src_end;
            dest_last = m.target_end;
        }
        gaps
    }

    pub fn length(&self) -> i64 {
        (self.src_end - self.src_start).max(self.target_end - self.target_start)
    }

    /// Fraction of the block covered by aligned target letters.
    pub fn p_aligned(&self) -> f64 {
        let aligned: i64 = self
            .matches()
            .iter()
            .map(|m| m.target_end - m.target_start)
            .sum();
        aligned as f64 / self.length() as f64
    }

    /// Truncate on the source axis with a 1:1 shift of the target bounds.
    pub fn clip(&self, start: Option<i64>, end: Option<i64>) -> Option<MergedBlock> {
        let bounds = self.bounds().clip(start, end)?;
        Some(MergedBlock {
            target: self.target,
            src_start: bounds.src_start,
            src_end: bounds.src_end,
            target_start: bounds.target_start,
            target_end: bounds.target_end,
            sub_intervals: clip_interval_list(start, end, self.sub_intervals.as_deref()),
        })
    }
}

pub type BlockMap = BTreeMap<TargetKey, Vec<MergedBlock>>;

/// Horizontal merge rules.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByIntervals {
    /// Longest source gap allowed inside a block.
    pub maxgap: i64,
    /// Smallest source gap; negative values allow overlapping hits.
    pub mingap: i64,
    /// Longest target insert allowed inside a block.
    pub maxinsert: i64,
    /// Smallest target insert; negative values allow overlap or cycles.
    pub mininsert: i64,
    /// Upper bound on block size along either axis.
    pub maxsize: i64,
    /// Merge every hit on a target into one block, ignoring the limits above.
    pub merge_all: bool,
    /// Target intervals to mask by; hits on other sequences are dropped and the
    /// rest clipped. Only the first interval per sequence is used.
    pub filter: Vec<Interval>,
}

impl Default for GroupByIntervals {
    fn default() -> Self {
        GroupByIntervals {
            maxgap: 0,
            mingap: 0,
            maxinsert: 0,
            mininsert: 0,
            maxsize: 500_000_000,
            merge_all: false,
            filter: Vec::new(),
        }
    }
}

impl GroupByIntervals {
    /// Merge generously but without swallowing a whole chromosome.
    pub fn merge_most() -> Self {
        GroupByIntervals {
            maxgap: 10_000,
            mingap: -10,
            maxinsert: 10_000,
            mininsert: -10,
            maxsize: 50_000,
            ..Self::default()
        }
    }

    pub fn merge_all() -> Self {
        GroupByIntervals {
            merge_all: true,
            ..Self::default()
        }
    }

    fn splits(&self, block: &MergedBlock, next: &MatchInterval) -> bool {
        if self.merge_all {
            return false;
        }
        let gap = next.src_start - block.src_end;
        let insert = next.target_start - block.target_end;
        gap > self.maxgap
            || gap < self.mingap
            || insert > self.maxinsert
            || insert < self.mininsert
            || next.src_end.max(block.src_end) - next.src_start.min(block.src_start) > self.maxsize
            || next.target_end.max(block.target_end) - next.target_start.min(block.target_start)
                > self.maxsize
    }
}

/// Vertical group-by rules.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBySequences {
    /// Minimum number of target sequences aligned at a position.
    pub min_aligned: usize,
    /// Minimum fraction of the group's sequences aligned at a position.
    pub p_min_aligned: f64,
    /// Report only source regions, one traversal per group.
    pub source_only: bool,
    /// With `source_only`, cut regions where a target's blocks were split.
    pub indel_cut: bool,
    /// Target sequences to sweep separately; all targets form one group by default.
    pub seq_groups: Option<Vec<Vec<SeqId>>>,
}

impl Default for GroupBySequences {
    fn default() -> Self {
        GroupBySequences {
            min_aligned: 1,
            p_min_aligned: 0.0,
            source_only: false,
            indel_cut: false,
            seq_groups: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupedInterval {
    Aligned {
        source: Interval,
        target: Interval,
        sub_intervals: Option<Vec<MatchInterval>>,
    },
    Source(Interval),
}

impl GroupedInterval {
    pub fn source(&self) -> &Interval {
        match self {
            GroupedInterval::Aligned { source, .. } => source,
            GroupedInterval::Source(source) => source,
        }
    }

    pub fn target(&self) -> Option<&Interval> {
        match self {
            GroupedInterval::Aligned { target, .. } => Some(target),
            GroupedInterval::Source(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPair {
    pub source: Interval,
    pub target: Interval,
}

/// Per-key FIFO of open blocks for the vertical sweep.
struct DictQueue<K: Ord, V> {
    map: BTreeMap<K, VecDeque<V>>,
}

impl<K: Ord + Copy, V: PartialEq + Copy> DictQueue<K, V> {
    fn new() -> Self {
        DictQueue {
            map: BTreeMap::new(),
        }
    }

    fn push(&mut self, key: K, value: V) {
        self.map.entry(key).or_default().push_back(value);
    }

    /// Removes `value` from `key`'s queue, falling back to the oldest entry.
    fn remove(&mut self, key: K, value: V) {
        if let Some(queue) = self.map.get_mut(&key) {
            match queue.iter().position(|v| *v == value) {
                Some(i) => {
                    queue.remove(i);
                }
                None => {
                    queue.pop_front();
                }
            }
            if queue.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    /// Number of distinct keys with at least one open entry.
    fn len(&self) -> usize {
        self.map.len()
    }

    fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.map.values().flat_map(|q| q.iter().copied())
    }
}

struct Bound {
    pos: i64,
    is_start: bool,
    order: usize,
    block: usize,
    seq: SeqId,
    is_indel: bool,
}

/// Everything aligned to one query interval.
#[derive(Debug, Clone)]
pub struct AlignmentSlice<'a> {
    store: &'a AlignmentStore,
    query: Interval,
    hits: Vec<&'a IntervalRecord>,
}

impl<'a> AlignmentSlice<'a> {
    pub fn new(store: &'a AlignmentStore, query: &Interval) -> Result<Self> {
        let hits: Vec<&IntervalRecord> = store.query(query)?.collect();
        if hits.is_empty() {
            return Err(NlmsaError::EmptySlice(*query));
        }
        debug!("Slice {} has {} hits", query, hits.len());
        Ok(AlignmentSlice {
            store,
            query: *query,
            hits,
        })
    }

    pub fn query(&self) -> &Interval {
        &self.query
    }

    pub fn store(&self) -> &'a AlignmentStore {
        self.store
    }

    /// Stored records overlapping the query, unclipped, in forest preorder.
    pub fn hits(&self) -> &[&'a IntervalRecord] {
        &self.hits
    }

    /// `(start, end, target_id, target_start, target_end)` with oriented
    /// target coordinates, as written by the text dump.
    pub fn raw_ivals(&self) -> Vec<(i64, i64, SeqId, i64, i64)> {
        self.hits
            .iter()
            .map(|r| {
                let (ts, te) = r.target.oriented_coords();
                (r.src.start, r.src.stop, r.target.seq, ts, te)
            })
            .collect()
    }

    fn clipped_source(&self, record: &IntervalRecord) -> Result<Option<Interval>> {
        Ok(record
            .src
            .intersect(&self.query.as_forward())?
            .map(|ov| Interval {
                orientation: self.query.orientation,
                ..ov
            }))
    }

    /// Every hit clipped to the query and projected onto its target.
    pub fn mapped(&self) -> Result<Vec<IntervalPair>> {
        let mut pairs = Vec::with_capacity(self.hits.len());
        for record in &self.hits {
            if let Some(source) = self.clipped_source(record)? {
                let target = record.transform().apply(&source)?;
                pairs.push(IntervalPair { source, target });
            }
        }
        Ok(pairs)
    }

    /// Clipped hits on non-LPO targets, in oriented coordinates.
    fn matches(&self) -> Result<Vec<(TargetKey, MatchInterval)>> {
        let mut out = Vec::with_capacity(self.hits.len());
        for record in &self.hits {
            if self.store.is_lpo(record.target.seq) {
                continue;
            }
            let Some(source) = record.src.intersect(&self.query.as_forward())? else {
                continue;
            };
            let target = record.transform().apply(&source)?;
            let key = TargetKey::of(&target);
            let (ts, te) = target.oriented_coords();
            out.push((key, MatchInterval::new(source.start, source.stop, ts, te)));
        }
        Ok(out)
    }

    /// Stored 1:1 pairs, unclipped, optionally restricted to one target
    /// sequence and orientation.
    pub fn match_intervals(&self, target: Option<&Interval>) -> Vec<IntervalPair> {
        self.hits
            .iter()
            .filter(|r| !self.store.is_lpo(r.target.seq))
            .filter(|r| {
                target.map_or(true, |t| {
                    t.seq == r.target.seq && t.orientation == r.orientation()
                })
            })
            .map(|r| IntervalPair {
                source: r.src,
                target: r.target,
            })
            .collect()
    }

    /// One covering interval per target sequence and orientation.
    pub fn seq_bounds(&self) -> Result<Vec<IntervalPair>> {
        let mut bounds: BTreeMap<TargetKey, MergedBlock> = BTreeMap::new();
        for (key, m) in self.matches()? {
            bounds
                .entry(key)
                .and_modify(|b| {
                    b.src_start = b.src_start.min(m.src_start);
                    b.src_end = b.src_end.max(m.src_end);
                    b.target_start = b.target_start.min(m.target_start);
                    b.target_end = b.target_end.max(m.target_end);
                })
                .or_insert_with(|| MergedBlock::from_match(key, m));
        }
        bounds
            .values()
            .map(|b| {
                Ok(IntervalPair {
                    source: b.source(self.query.seq)?,
                    target: b.target_interval()?,
                })
            })
            .collect()
    }

    /// Covering interval of `target`'s sequence and orientation in this slice.
    pub fn find_seq_ends(&self, target: &Interval) -> Result<Interval> {
        self.seq_bounds()?
            .into_iter()
            .find(|p| p.target.seq == target.seq && p.target.orientation == target.orientation)
            .map(|p| p.target)
            .ok_or(NlmsaError::NotFound(target.seq))
    }

    /// Number of distinct non-LPO target sequence/orientation pairs.
    pub fn len(&self) -> usize {
        let mut keys: Vec<TargetKey> = self
            .hits
            .iter()
            .filter(|r| !self.store.is_lpo(r.target.seq))
            .map(|r| TargetKey::of(&r.target))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn group_by_intervals(&self, opts: &GroupByIntervals) -> Result<BlockMap> {
        let mut masks: FxHashMap<SeqId, Interval> = FxHashMap::default();
        for ival in &opts.filter {
            masks.entry(ival.seq).or_insert(*ival);
        }

        let mut per_target: BTreeMap<TargetKey, Vec<MatchInterval>> = BTreeMap::new();
        for (key, m) in self.matches()? {
            let m = if opts.filter.is_empty() {
                m
            } else {
                let Some(mask) = masks.get(&key.seq) else {
                    continue;
                };
                let (ms, me) = key.orient(mask.start, mask.stop);
                if m.target_end <= ms || m.target_start >= me {
                    continue;
                }
                let mut clipped = m;
                if clipped.target_start < ms {
                    clipped.src_start += ms - clipped.target_start;
                    clipped.target_start = ms;
                }
                if clipped.target_end > me {
                    clipped.src_end -= clipped.target_end - me;
                    clipped.target_end = me;
                }
                if clipped.src_start >= clipped.src_end {
                    continue;
                }
                clipped
            };
            per_target.entry(key).or_default().push(m);
        }

        let mut blocks = BlockMap::new();
        for (key, mut hits) in per_target {
            hits.sort_unstable();
            blocks.insert(key, merge_hits(key, &hits, opts));
        }
        Ok(blocks)
    }

    pub fn group_by_sequences(
        &self,
        blocks: &BlockMap,
        opts: &GroupBySequences,
    ) -> Result<Vec<GroupedInterval>> {
        let groups = match &opts.seq_groups {
            Some(groups) => groups.clone(),
            None => {
                let mut seqs: Vec<SeqId> = blocks.keys().map(|k| k.seq).collect();
                seqs.dedup();
                vec![seqs]
            }
        };

        let mut result = Vec::new();
        for group in &groups {
            if group.is_empty() {
                continue;
            }
            let mut members: Vec<&MergedBlock> = Vec::new();
            let mut bounds: Vec<Bound> = Vec::new();
            for (order, &seq) in group.iter().enumerate() {
                let mut is_indel = false;
                for orientation in [Orientation::Forward, Orientation::Reverse] {
                    let key = TargetKey { seq, orientation };
                    for block in blocks.get(&key).into_iter().flatten() {
                        let id = members.len();
                        members.push(block);
                        bounds.push(Bound {
                            pos: block.src_end,
                            is_start: false,
                            order,
                            block: id,
                            seq,
                            is_indel,
                        });
                        bounds.push(Bound {
                            pos: block.src_start,
                            is_start: true,
                            order,
                            block: id,
                            seq,
                            is_indel,
                        });
                        is_indel = true;
                    }
                }
            }
            // stops sort before starts at the same position
            bounds.sort_by_key(|b| (b.pos, b.is_start, b.order, b.block));
            self.sweep(&bounds, &members, group.len(), opts, &mut result)?;
        }
        Ok(result)
    }

    fn aligned(&self, block: &MergedBlock) -> Result<GroupedInterval> {
        Ok(GroupedInterval::Aligned {
            source: block.source(self.query.seq)?,
            target: block.target_interval()?,
            sub_intervals: block.sub_intervals.clone(),
        })
    }

    fn sweep(
        &self,
        bounds: &[Bound],
        members: &[&MergedBlock],
        group_size: usize,
        opts: &GroupBySequences,
        result: &mut Vec<GroupedInterval>,
    ) -> Result<()> {
        let mut open: DictQueue<SeqId, usize> = DictQueue::new();
        let mut mask_start: Option<i64> = None;
        for bound in bounds {
            if bound.is_start {
                open.push(bound.seq, bound.block);
            } else {
                if let (Some(ms), false) = (mask_start, opts.source_only) {
                    if let Some(block) = members[bound.block].clip(Some(ms), None) {
                        result.push(self.aligned(&block)?);
                    }
                }
                open.remove(bound.seq, bound.block);
            }

            let aligned = open.len();
            if aligned < opts.min_aligned
                || (aligned as f64) / (group_size as f64) < opts.p_min_aligned
            {
                if let Some(ms) = mask_start.take() {
                    if opts.source_only {
                        if ms < bound.pos {
                            result.push(GroupedInterval::Source(Interval::new(
                                self.query.seq,
                                ms,
                                bound.pos,
                            )?));
                        }
                    } else {
                        for id in open.values() {
                            if let Some(block) = members[id].clip(Some(ms), Some(bound.pos)) {
                                result.push(self.aligned(&block)?);
                            }
                        }
                    }
                }
            } else if mask_start.is_none() {
                mask_start = Some(bound.pos);
            }

            if opts.source_only && opts.indel_cut && bound.is_indel {
                if let Some(ms) = mask_start {
                    if ms < bound.pos {
                        result.push(GroupedInterval::Source(Interval::new(
                            self.query.seq,
                            ms,
                            bound.pos,
                        )?));
                        mask_start = Some(bound.pos);
                    }
                }
            }
        }
        Ok(())
    }

    /// Both group-by passes in sequence.
    pub fn edges(
        &self,
        intervals: &GroupByIntervals,
        sequences: &GroupBySequences,
    ) -> Result<Vec<GroupedInterval>> {
        let blocks = self.group_by_intervals(intervals)?;
        self.group_by_sequences(&blocks, sequences)
    }

    /// Target intervals aligned to this slice under the group-by rules.
    pub fn keys(
        &self,
        intervals: &GroupByIntervals,
        sequences: &GroupBySequences,
    ) -> Result<Vec<Interval>> {
        Ok(self
            .edges(intervals, sequences)?
            .iter()
            .filter_map(|g| g.target().copied())
            .collect())
    }

    /// Cut the query into source regions at every indel, and slice each.
    pub fn split(&self, intervals: &GroupByIntervals) -> Result<Vec<AlignmentSlice<'a>>> {
        let sequences = GroupBySequences {
            source_only: true,
            indel_cut: true,
            ..GroupBySequences::default()
        };
        let mut slices = Vec::new();
        for region in self.edges(intervals, &sequences)? {
            slices.push(self.store.slice(region.source())?);
        }
        Ok(slices)
    }

    /// LPO regions aligned to this slice, cut by the same rules as [`split`].
    /// A slice of an LPO path is split directly.
    ///
    /// [`split`]: AlignmentSlice::split
    pub fn regions(&self, intervals: &GroupByIntervals) -> Result<Vec<AlignmentSlice<'a>>> {
        if self.store.is_lpo(self.query.seq) {
            return self.split(intervals);
        }
        let mut covers: BTreeMap<SeqId, (i64, i64)> = BTreeMap::new();
        for record in &self.hits {
            if !self.store.is_lpo(record.target.seq) {
                continue;
            }
            let Some(source) = self.clipped_source(record)? else {
                continue;
            };
            let target = record.transform().apply(&source)?;
            covers
                .entry(target.seq)
                .and_modify(|(s, e)| {
                    *s = (*s).min(target.start);
                    *e = (*e).max(target.stop);
                })
                .or_insert((target.start, target.stop));
        }
        if covers.is_empty() {
            return Err(NlmsaError::PathMismatch(format!(
                "no LPO is aligned to {}",
                self.query
            )));
        }
        let mut regions = Vec::new();
        for (lpo, (start, stop)) in covers {
            let slice = self.store.slice(&Interval::new(lpo, start, stop)?)?;
            regions.extend(slice.split(intervals)?);
        }
        debug!("{} maps onto {} LPO regions", self.query, regions.len());
        Ok(regions)
    }

    /// Clipped, projected hits whose edge meets the thresholds. Hits without an
    /// edge are left out.
    pub fn filter_edges(
        &self,
        p_identity_min: Option<f64>,
        p_aligned_min: Option<f64>,
    ) -> Result<Vec<IntervalPair>> {
        let mut pairs = Vec::new();
        for record in &self.hits {
            let Some(edge) = &record.edge else {
                continue;
            };
            if let Some(min) = p_identity_min {
                if edge.percent_identity()? < min {
                    continue;
                }
            }
            if let Some(min) = p_aligned_min {
                if edge.percent_aligned()? < min {
                    continue;
                }
            }
            if let Some(source) = self.clipped_source(record)? {
                let target = record.transform().apply(&source)?;
                pairs.push(IntervalPair { source, target });
            }
        }
        Ok(pairs)
    }
}

/// Fuse a target's hits, sorted by source start, into blocks.
fn merge_hits(key: TargetKey, hits: &[MatchInterval], opts: &GroupByIntervals) -> Vec<MergedBlock> {
    let mut blocks = Vec::new();
    let Some((first, rest)) = hits.split_first() else {
        return blocks;
    };
    let mut current = MergedBlock::from_match(key, *first);
    for hit in rest {
        if opts.splits(&current, hit) {
            blocks.push(current);
            current = MergedBlock::from_match(key, *hit);
            continue;
        }
        let contiguous = |last: &MatchInterval| {
            last.src_end == hit.src_start && last.target_end == hit.target_start
        };
        let only = current.bounds();
        match current.sub_intervals.as_mut() {
            None => {
                current.sub_intervals = Some(if contiguous(&only) {
                    vec![MatchInterval::new(
                        only.src_start,
                        hit.src_end,
                        only.target_start,
                        hit.target_end,
                    )]
                } else {
                    vec![only, *hit]
                });
            }
            Some(list) => match list.last_mut() {
                Some(last) if contiguous(last) => {
                    last.src_end = hit.src_end;
                    last.target_end = hit.target_end;
                }
                _ => list.push(*hit),
            },
        }
        current.src_start = current.src_start.min(hit.src_start);
        current.src_end = current.src_end.max(hit.src_end);
        current.target_start = current.target_start.min(hit.target_start);
        current.target_end = current.target_end.max(hit.target_end);
    }
    blocks.push(current);

    for block in &mut blocks {
        if block.sub_intervals.as_ref().is_some_and(|l| l.len() < 2) {
            block.sub_intervals = None;
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AlignmentStoreBuilder;
    use proptest::prelude::*;

    const SRC: SeqId = 0;

    fn fwd(seq: SeqId, s: i64, e: i64) -> Interval {
        Interval::new(seq, s, e).unwrap()
    }

    fn rev(seq: SeqId, s: i64, e: i64) -> Interval {
        Interval::with_orientation(seq, s, e, Orientation::Reverse).unwrap()
    }

    fn store(hits: &[(i64, i64, Interval)]) -> AlignmentStore {
        let mut builder = AlignmentStoreBuilder::new();
        for &(s, e, target) in hits {
            builder.insert(fwd(SRC, s, e), target, None).unwrap();
        }
        builder.freeze()
    }

    fn spans(blocks: &[MergedBlock]) -> Vec<(i64, i64, i64, i64)> {
        blocks
            .iter()
            .map(|b| (b.src_start, b.src_end, b.target_start, b.target_end))
            .collect()
    }

    #[test]
    fn test_empty_slice() {
        let store = store(&[(0, 10, fwd(1, 0, 10))]);
        assert!(matches!(
            store.slice(&fwd(SRC, 20, 30)),
            Err(NlmsaError::EmptySlice(_))
        ));
        assert!(matches!(
            store.slice(&fwd(9, 0, 10)),
            Err(NlmsaError::NotFound(9))
        ));
    }

    #[test]
    fn test_contiguous_hits_fuse_into_single_piece() {
        let store = store(&[(0, 10, fwd(1, 100, 110)), (10, 20, fwd(1, 110, 120))]);
        let slice = store.slice(&fwd(SRC, 0, 20)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        let list = &blocks[&TargetKey { seq: 1, orientation: Orientation::Forward }];
        assert_eq!(spans(list), vec![(0, 20, 100, 120)]);
        assert_eq!(list[0].sub_intervals, None);
    }

    #[test]
    fn test_gapped_hits_keep_sub_intervals() {
        let store = store(&[(0, 10, fwd(1, 0, 10)), (12, 20, fwd(1, 15, 23))]);
        let slice = store.slice(&fwd(SRC, 0, 20)).unwrap();
        let opts = GroupByIntervals {
            maxgap: 5,
            maxinsert: 5,
            ..GroupByIntervals::default()
        };
        let blocks = slice.group_by_intervals(&opts).unwrap();
        let block = &blocks.values().next().unwrap()[0];
        assert_eq!(spans(std::slice::from_ref(block)), vec![(0, 20, 0, 23)]);
        assert_eq!(
            block.sub_intervals,
            Some(vec![MatchInterval::new(0, 10, 0, 10), MatchInterval::new(12, 20, 15, 23)])
        );
        assert_eq!(block.gaps(), vec![(Some((10, 12)), Some((10, 15)))]);
        assert_eq!(block.length(), 23);
        assert!((block.p_aligned() - 18.0 / 23.0).abs() < 1e-12);
    }

    #[test]
    fn test_hits_are_clipped_to_query() {
        let store = store(&[(0, 100, fwd(1, 1000, 1100))]);
        let slice = store.slice(&fwd(SRC, 10, 20)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        assert_eq!(spans(&blocks.values().next().unwrap()[..]), vec![(10, 20, 1010, 1020)]);
        assert_eq!(slice.raw_ivals(), vec![(0, 100, 1, 1000, 1100)]);
    }

    #[test]
    fn test_reverse_hits_merge_in_oriented_coordinates() {
        // two contiguous reverse-strand hits: target runs downwards
        let store = store(&[(0, 10, rev(1, 90, 100)), (10, 20, rev(1, 80, 90))]);
        let slice = store.slice(&fwd(SRC, 0, 20)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        let list = &blocks[&TargetKey { seq: 1, orientation: Orientation::Reverse }];
        assert_eq!(spans(list), vec![(0, 20, -100, -80)]);
        assert_eq!(list[0].target_interval().unwrap(), rev(1, 80, 100));
    }

    #[test]
    fn test_merge_most_and_maxsize() {
        let store = store(&[(0, 10, fwd(1, 0, 10)), (100, 110, fwd(1, 100, 110))]);
        let slice = store.slice(&fwd(SRC, 0, 200)).unwrap();
        let merged = slice.group_by_intervals(&GroupByIntervals::merge_most()).unwrap();
        assert_eq!(merged.values().next().unwrap().len(), 1);
        let capped = GroupByIntervals {
            maxsize: 50,
            ..GroupByIntervals::merge_most()
        };
        assert_eq!(slice.group_by_intervals(&capped).unwrap().values().next().unwrap().len(), 2);
        let all = slice.group_by_intervals(&GroupByIntervals::merge_all()).unwrap();
        assert_eq!(all.values().next().unwrap().len(), 1);
    }

    #[test]
    fn test_regions_follow_lpo_indels() {
        use crate::context::BuildContext;

        let mut ctx = BuildContext::new();
        let seq1 = ctx.register("seq1", Some(100));
        let seq2 = ctx.register("seq2", Some(110));
        let mut builder = AlignmentStoreBuilder::bidirectional();
        ctx.insert_lpo(&mut builder, 0, 100, fwd(seq1, 0, 100), None).unwrap();
        ctx.insert_lpo(&mut builder, 0, 30, fwd(seq2, 0, 30), None).unwrap();
        ctx.insert_lpo(&mut builder, 30, 100, fwd(seq2, 40, 110), None).unwrap();
        let lpo = ctx.pages()[0].id;
        let store = builder.freeze();

        let slice = store.slice(&fwd(seq1, 10, 50)).unwrap();
        let regions = slice.regions(&GroupByIntervals::default()).unwrap();
        let queries: Vec<Interval> = regions.iter().map(|r| *r.query()).collect();
        assert_eq!(queries, vec![fwd(lpo, 10, 30), fwd(lpo, 30, 50)]);

        // an LPO slice is cut in place
        let on_lpo = store.slice(&fwd(lpo, 10, 50)).unwrap();
        let direct: Vec<Interval> = on_lpo
            .regions(&GroupByIntervals::default())
            .unwrap()
            .iter()
            .map(|r| *r.query())
            .collect();
        assert_eq!(direct, queries);

        let plain = store_without_lpo();
        let slice = plain.slice(&fwd(SRC, 0, 10)).unwrap();
        assert!(matches!(
            slice.regions(&GroupByIntervals::default()),
            Err(NlmsaError::PathMismatch(_))
        ));
    }

    fn store_without_lpo() -> AlignmentStore {
        store(&[(0, 10, fwd(1, 0, 10))])
    }

    #[test]
    fn test_merged_bounds_cover_every_piece() {
        let store = store(&[(0, 10, fwd(1, 500, 510)), (20, 30, fwd(1, 0, 10))]);
        let slice = store.slice(&fwd(SRC, 0, 30)).unwrap();
        for opts in [GroupByIntervals::merge_all(), GroupByIntervals {
            maxgap: 100,
            mininsert: -1000,
            maxsize: 1000,
            ..GroupByIntervals::default()
        }] {
            let blocks = slice.group_by_intervals(&opts).unwrap();
            let list = blocks.values().next().unwrap();
            assert_eq!(list.len(), 1);
            let block = &list[0];
            assert_eq!(block.bounds(), MatchInterval::new(0, 30, 0, 510));
            for piece in block.matches() {
                assert!(piece.target_start >= block.target_start);
                assert!(piece.target_end <= block.target_end);
            }
            assert!(block.p_aligned() <= 1.0);
        }
    }

    #[test]
    fn test_filter_list_masks_targets() {
        let store = store(&[(0, 50, fwd(1, 0, 50)), (0, 50, fwd(2, 0, 50))]);
        let slice = store.slice(&fwd(SRC, 0, 50)).unwrap();
        let opts = GroupByIntervals {
            filter: vec![fwd(1, 10, 20)],
            ..GroupByIntervals::default()
        };
        let blocks = slice.group_by_intervals(&opts).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(spans(&blocks.values().next().unwrap()[..]), vec![(10, 20, 10, 20)]);
    }

    #[test]
    fn test_lpo_targets_are_skipped() {
        let mut builder = AlignmentStoreBuilder::new();
        builder.insert(fwd(SRC, 0, 10), fwd(5, 0, 10), None).unwrap();
        builder.insert(fwd(SRC, 0, 10), fwd(1, 0, 10), None).unwrap();
        builder.mark_lpo(5);
        let store = builder.freeze();
        let slice = store.slice(&fwd(SRC, 0, 10)).unwrap();
        assert_eq!(slice.len(), 1);
        assert_eq!(slice.hits().len(), 2);
        assert_eq!(slice.match_intervals(None).len(), 1);
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        assert!(blocks.keys().all(|k| k.seq == 1));
    }

    #[test]
    fn test_seq_bounds_and_ends() {
        let store = store(&[
            (0, 10, fwd(1, 100, 110)),
            (20, 30, fwd(1, 140, 150)),
            (0, 10, rev(1, 500, 510)),
        ]);
        let slice = store.slice(&fwd(SRC, 0, 30)).unwrap();
        let bounds = slice.seq_bounds().unwrap();
        assert_eq!(bounds.len(), 2);
        assert_eq!(bounds[0].target, fwd(1, 100, 150));
        assert_eq!(bounds[0].source, fwd(SRC, 0, 30));
        assert_eq!(slice.find_seq_ends(&rev(1, 0, 1)).unwrap(), rev(1, 500, 510));
        assert!(matches!(
            slice.find_seq_ends(&fwd(4, 0, 1)),
            Err(NlmsaError::NotFound(4))
        ));
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.match_intervals(Some(&fwd(1, 0, 1))).len(), 2);
    }

    #[test]
    fn test_group_by_sequences_reports_every_block() {
        let store = store(&[(0, 10, fwd(1, 0, 10)), (5, 15, fwd(2, 0, 10))]);
        let slice = store.slice(&fwd(SRC, 0, 15)).unwrap();
        let out = slice
            .edges(&GroupByIntervals::default(), &GroupBySequences::default())
            .unwrap();
        let targets: Vec<Interval> = out.iter().filter_map(|g| g.target().copied()).collect();
        assert_eq!(targets, vec![fwd(1, 0, 10), fwd(2, 0, 10)]);
    }

    #[test]
    fn test_min_aligned_masks_sparse_regions() {
        // seq 1 covers [0,10), seq 2 covers [5,15): two aligned only on [5,10)
        let store = store(&[(0, 10, fwd(1, 0, 10)), (5, 15, fwd(2, 0, 10))]);
        let slice = store.slice(&fwd(SRC, 0, 15)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        let opts = GroupBySequences {
            min_aligned: 2,
            ..GroupBySequences::default()
        };
        let out = slice.group_by_sequences(&blocks, &opts).unwrap();
        let pairs: Vec<(Interval, Interval)> = out
            .iter()
            .map(|g| (*g.source(), *g.target().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (fwd(SRC, 5, 10), fwd(1, 5, 10)),
                (fwd(SRC, 5, 10), fwd(2, 0, 5)),
            ]
        );

        let source_only = GroupBySequences {
            min_aligned: 2,
            source_only: true,
            ..GroupBySequences::default()
        };
        let out = slice.group_by_sequences(&blocks, &source_only).unwrap();
        assert_eq!(out, vec![GroupedInterval::Source(fwd(SRC, 5, 10))]);

        let fraction = GroupBySequences {
            p_min_aligned: 0.75,
            source_only: true,
            ..GroupBySequences::default()
        };
        let out = slice.group_by_sequences(&blocks, &fraction).unwrap();
        assert_eq!(out, vec![GroupedInterval::Source(fwd(SRC, 5, 10))]);
    }

    #[test]
    fn test_source_only_indel_cut() {
        // seq 1 split into two blocks by a 5bp insert, seq 2 spans the query
        let store = store(&[
            (0, 10, fwd(1, 0, 10)),
            (10, 20, fwd(1, 15, 25)),
            (0, 20, fwd(2, 0, 20)),
        ]);
        let slice = store.slice(&fwd(SRC, 0, 20)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        assert_eq!(blocks.values().next().unwrap().len(), 2);

        let whole = GroupBySequences {
            source_only: true,
            ..GroupBySequences::default()
        };
        assert_eq!(
            slice.group_by_sequences(&blocks, &whole).unwrap(),
            vec![GroupedInterval::Source(fwd(SRC, 0, 20))]
        );

        let cut = GroupBySequences {
            source_only: true,
            indel_cut: true,
            ..GroupBySequences::default()
        };
        assert_eq!(
            slice.group_by_sequences(&blocks, &cut).unwrap(),
            vec![
                GroupedInterval::Source(fwd(SRC, 0, 10)),
                GroupedInterval::Source(fwd(SRC, 10, 20)),
            ]
        );

        let pieces = slice.split(&GroupByIntervals::default()).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[1].query(), &fwd(SRC, 10, 20));
    }

    #[test]
    fn test_duplicate_blocks_for_one_sequence_are_fifo() {
        // two overlapping blocks on the same target sequence
        let store = store(&[(0, 10, fwd(1, 0, 10)), (2, 8, fwd(1, 50, 56)), (0, 10, fwd(2, 0, 10))]);
        let slice = store.slice(&fwd(SRC, 0, 10)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        let opts = GroupBySequences {
            min_aligned: 2,
            ..GroupBySequences::default()
        };
        let targets: Vec<Interval> = slice
            .group_by_sequences(&blocks, &opts)
            .unwrap()
            .iter()
            .filter_map(|g| g.target().copied())
            .collect();
        assert_eq!(targets, vec![fwd(1, 50, 56), fwd(1, 0, 10), fwd(2, 0, 10)]);
    }

    #[test]
    fn test_seq_groups_are_swept_separately() {
        let store = store(&[(0, 10, fwd(1, 0, 10)), (0, 10, fwd(2, 0, 10)), (0, 10, fwd(3, 0, 10))]);
        let slice = store.slice(&fwd(SRC, 0, 10)).unwrap();
        let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
        let opts = GroupBySequences {
            min_aligned: 2,
            seq_groups: Some(vec![vec![1, 2], vec![3]]),
            ..GroupBySequences::default()
        };
        let out = slice.group_by_sequences(&blocks, &opts).unwrap();
        let seqs: Vec<SeqId> = out.iter().filter_map(|g| g.target().map(|t| t.seq)).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_filter_edges_uses_edge_accessors() {
        use crate::edge::Edge;
        let mut builder = AlignmentStoreBuilder::new();
        builder
            .insert(fwd(SRC, 0, 10), fwd(1, 0, 10), Some(Edge::scores(1.0, 0.99, 1.0)))
            .unwrap();
        builder
            .insert(fwd(SRC, 0, 10), fwd(2, 0, 10), Some(Edge::scores(1.0, 0.5, 1.0)))
            .unwrap();
        builder.insert(fwd(SRC, 0, 10), fwd(3, 0, 10), None).unwrap();
        let store = builder.freeze();
        let slice = store.slice(&fwd(SRC, 2, 4)).unwrap();
        let kept = slice.filter_edges(Some(0.9), None).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].target, fwd(1, 2, 4));
    }

    #[test]
    fn test_clip_interval_list() {
        let list = [
            MatchInterval::new(0, 10, 0, 10),
            MatchInterval::new(12, 20, 15, 23),
            MatchInterval::new(25, 30, 30, 35),
        ];
        assert_eq!(
            clip_interval_list(Some(5), Some(27), Some(&list)),
            Some(vec![
                MatchInterval::new(5, 10, 5, 10),
                MatchInterval::new(12, 20, 15, 23),
                MatchInterval::new(25, 27, 30, 32),
            ])
        );
        assert_eq!(clip_interval_list(Some(13), None, Some(&list[..2])), None);
        assert_eq!(clip_interval_list(None, None, None), None);
    }

    proptest! {
        #[test]
        fn prop_strict_merge_needs_contiguity(
            raw in prop::collection::vec((0i64..200, 1i64..20, 0i64..200), 1..25)
        ) {
            let hits: Vec<_> = raw.iter().map(|&(s, l, t)| (s, s + l, fwd(1, t, t + l))).collect();
            let store = store(&hits);
            let slice = store.slice(&fwd(SRC, 0, 1000)).unwrap();
            let blocks = slice.group_by_intervals(&GroupByIntervals::default()).unwrap();
            for block in blocks.values().flatten() {
                for pair in block.matches().windows(2) {
                    prop_assert_eq!(pair[0].src_end, pair[1].src_start);
                    prop_assert_eq!(pair[0].target_end, pair[1].target_start);
                }
                // strict merging only ever fuses, so no sub-interval list survives
                prop_assert!(block.sub_intervals.is_none());
            }
        }
    }
}
