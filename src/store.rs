//! Map from path identity to its interval index.
//!
//! Inserts go into an [`AlignmentStoreBuilder`]; `freeze` builds every
//! per-path forest in parallel and hands back an immutable [`AlignmentStore`]
//! that can be shared across query threads.

use crate::alignment_record::{AlignmentTuple, IntervalRecord};
use crate::edge::Edge;
use crate::error::{NlmsaError, Result};
use crate::forest::Overlaps;
use crate::index::{IntervalIndex, IntervalIndexBuilder};
use crate::interval::Interval;
use crate::slice::AlignmentSlice;
use crate::SeqId;
use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct AlignmentStoreBuilder {
    paths: FxHashMap<SeqId, IntervalIndexBuilder>,
    bidirectional: bool,
    lpo: BTreeSet<SeqId>,
}

impl AlignmentStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert is mirrored with source and destination swapped.
    pub fn bidirectional() -> Self {
        AlignmentStoreBuilder {
            bidirectional: true,
            ..Self::default()
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    pub fn ensure_path(&mut self, id: SeqId) -> &mut IntervalIndexBuilder {
        self.paths
            .entry(id)
            .or_insert_with(|| IntervalIndexBuilder::new(id))
    }

    pub fn insert(&mut self, src: Interval, dest: Interval, edge: Option<Edge>) -> Result<()> {
        let record = IntervalRecord::new(src, dest, edge);
        if self.bidirectional {
            if record.is_self_mapping() {
                debug!("Not mirroring self-mapping {}", record.src);
            } else {
                self.insert_record(record.mirrored())?;
            }
        }
        self.insert_record(record)
    }

    /// Stores `record` as is, without mirroring.
    pub fn insert_record(&mut self, record: IntervalRecord) -> Result<()> {
        self.ensure_path(record.src.seq).insert(record)
    }

    pub fn insert_tuple(&mut self, src_seq: SeqId, tuple: AlignmentTuple) -> Result<()> {
        let record = tuple.into_record(src_seq)?;
        self.insert(record.src, record.target, record.edge)
    }

    /// Flags a path as a virtual LPO coordinate page.
    pub fn mark_lpo(&mut self, id: SeqId) {
        self.lpo.insert(id);
    }

    pub fn len(&self) -> usize {
        self.paths.values().map(IntervalIndexBuilder::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn freeze(self) -> AlignmentStore {
        let n_paths = self.paths.len();
        let indexes: FxHashMap<SeqId, IntervalIndex> = self
            .paths
            .into_par_iter()
            .map(|(id, builder)| (id, builder.freeze()))
            .collect();
        let store = AlignmentStore {
            indexes,
            bidirectional: self.bidirectional,
            lpo: self.lpo,
        };
        info!(
            "Built alignment store: {} paths, {} intervals",
            n_paths,
            store.len()
        );
        store
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlignmentStore {
    indexes: FxHashMap<SeqId, IntervalIndex>,
    bidirectional: bool,
    lpo: BTreeSet<SeqId>,
}

impl AlignmentStore {
    pub fn get(&self, path: SeqId) -> Result<&IntervalIndex> {
        self.indexes.get(&path).ok_or(NlmsaError::NotFound(path))
    }

    pub fn contains_path(&self, path: SeqId) -> bool {
        self.indexes.contains_key(&path)
    }

    /// Path identities in ascending order.
    pub fn paths(&self) -> Vec<SeqId> {
        let mut paths: Vec<SeqId> = self.indexes.keys().copied().collect();
        paths.sort_unstable();
        paths
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    pub fn is_lpo(&self, path: SeqId) -> bool {
        self.lpo.contains(&path)
    }

    pub fn lpo_paths(&self) -> impl Iterator<Item = SeqId> + '_ {
        self.lpo.iter().copied()
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.indexes.values().map(IntervalIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_paths(&self) -> usize {
        self.indexes.len()
    }

    /// `store[interval]`: raw records overlapping the interval.
    pub fn query(&self, interval: &Interval) -> Result<Overlaps<'_>> {
        self.get(interval.seq)?.find_overlaps(interval)
    }

    pub fn slice(&self, interval: &Interval) -> Result<AlignmentSlice<'_>> {
        AlignmentSlice::new(self, interval)
    }

    /// Independent slices answered on the rayon pool.
    pub fn par_slices(&self, intervals: &[Interval]) -> Vec<Result<AlignmentSlice<'_>>> {
        intervals.par_iter().map(|ival| self.slice(ival)).collect()
    }

    /// Thaw every index back into a builder for further inserts.
    pub fn into_builder(self) -> AlignmentStoreBuilder {
        AlignmentStoreBuilder {
            paths: self
                .indexes
                .into_iter()
                .map(|(id, index)| (id, index.into_builder()))
                .collect(),
            bidirectional: self.bidirectional,
            lpo: self.lpo,
        }
    }
}
