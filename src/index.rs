//! Per-path interval index, split into a staging builder and a frozen,
//! query-only index.

use crate::alignment_record::IntervalRecord;
use crate::error::{NlmsaError, Result};
use crate::forest::{ContainmentForest, Overlaps};
use crate::interval::Interval;
use crate::SeqId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct IntervalIndexBuilder {
    path: SeqId,
    staged: Vec<IntervalRecord>,
}

impl IntervalIndexBuilder {
    pub fn new(path: SeqId) -> Self {
        IntervalIndexBuilder {
            path,
            staged: Vec::new(),
        }
    }

    pub fn path(&self) -> SeqId {
        self.path
    }

    pub fn insert(&mut self, record: IntervalRecord) -> Result<()> {
        if record.src.seq != self.path {
            return Err(NlmsaError::PathMismatch(format!(
                "record on {} inserted into index for {}",
                record.src.seq, self.path
            )));
        }
        self.staged.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn freeze(self) -> IntervalIndex {
        IntervalIndex {
            path: self.path,
            forest: ContainmentForest::build(self.staged),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalIndex {
    path: SeqId,
    forest: ContainmentForest,
}

impl IntervalIndex {
    pub fn path(&self) -> SeqId {
        self.path
    }

    pub fn forest(&self) -> &ContainmentForest {
        &self.forest
    }

    pub fn len(&self) -> usize {
        self.forest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    pub fn find_overlaps(&self, query: &Interval) -> Result<Overlaps<'_>> {
        if query.seq != self.path {
            return Err(NlmsaError::PathMismatch(format!(
                "query {} against index for {}",
                query, self.path
            )));
        }
        Ok(self.forest.overlaps(query.start, query.stop))
    }

    pub fn walk(&self) -> std::slice::Iter<'_, IntervalRecord> {
        self.forest.walk()
    }

    /// Thaw back into a builder holding every stored record.
    pub fn into_builder(self) -> IntervalIndexBuilder {
        IntervalIndexBuilder {
            path: self.path,
            staged: self.forest.into_records(),
        }
    }

    pub fn rebuild(self) -> IntervalIndex {
        self.into_builder().freeze()
    }
}
