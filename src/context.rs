//! Build-time state threaded through insertion: the sequence registry and the
//! pages of the virtual LPO coordinate axis.
//!
//! The LPO axis is a synthetic reference used when aligning many sequences
//! without a designated reference genome. It is split into pages of at most
//! `max_page_len` positions, each page registered as its own path, so no
//! single path grows past the coordinate range the index is built for.

use crate::edge::Edge;
use crate::error::{NlmsaError, Result};
use crate::interval::Interval;
use crate::seqidx::SequenceIndex;
use crate::store::AlignmentStoreBuilder;
use crate::transform::CoordinateTransform;
use crate::SeqId;
use log::debug;

pub const DEFAULT_MAX_PAGE_LEN: i64 = 1 << 30;

/// Path id standing in for the whole, unpaged LPO axis.
const VIRTUAL_AXIS: SeqId = SeqId::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpoPage {
    pub id: SeqId,
    pub offset: i64,
    pub length: i64,
}

impl LpoPage {
    pub fn end(&self) -> i64 {
        self.offset + self.length
    }
}

#[derive(Debug)]
pub struct BuildContext {
    pub seq_index: SequenceIndex,
    pages: Vec<LpoPage>,
    max_page_len: i64,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    pub fn new() -> Self {
        Self::with_max_page_len(DEFAULT_MAX_PAGE_LEN)
    }

    pub fn with_max_page_len(max_page_len: i64) -> Self {
        BuildContext {
            seq_index: SequenceIndex::new(),
            pages: Vec::new(),
            max_page_len: max_page_len.max(1),
        }
    }

    pub fn from_index(seq_index: SequenceIndex) -> Self {
        BuildContext {
            seq_index,
            ..Self::new()
        }
    }

    pub fn register(&mut self, name: &str, length: Option<i64>) -> SeqId {
        self.seq_index.get_or_insert_id(name, length)
    }

    pub fn max_page_len(&self) -> i64 {
        self.max_page_len
    }

    pub fn pages(&self) -> &[LpoPage] {
        &self.pages
    }

    pub fn is_lpo(&self, id: SeqId) -> bool {
        self.pages.iter().any(|p| p.id == id)
    }

    /// Allocate pages until the virtual axis covers `[0, stop)`.
    fn ensure_span(&mut self, stop: i64) {
        while self.pages.last().map_or(0, LpoPage::end) < stop {
            let offset = self.pages.last().map_or(0, LpoPage::end);
            let name = format!("LPO.{}", self.pages.len());
            let id = self.seq_index.get_or_insert_id(&name, Some(self.max_page_len));
            debug!("Allocated LPO page {} at offset {}", name, offset);
            self.pages.push(LpoPage {
                id,
                offset,
                length: self.max_page_len,
            });
        }
    }

    /// Split `[start, stop)` on the virtual axis into page-local pieces, each
    /// paired with the matching slice of `target`. A mapping that crosses a
    /// page boundary must be 1:1.
    pub fn split_lpo(
        &mut self,
        start: i64,
        stop: i64,
        target: Interval,
    ) -> Result<Vec<(Interval, Interval)>> {
        if start < 0 || start >= stop {
            return Err(NlmsaError::MalformedInterval(format!(
                "LPO interval {}-{} is empty or negative",
                start, stop
            )));
        }
        self.ensure_span(stop);
        let first = self.pages.partition_point(|p| p.end() <= start);
        let crosses = self.pages[first].end() < stop;
        if crosses && target.len() != stop - start {
            return Err(NlmsaError::MalformedInterval(format!(
                "LPO interval {}-{} crosses a page boundary but maps onto {} letters",
                start,
                stop,
                target.len()
            )));
        }

        let whole = Interval::new(VIRTUAL_AXIS, start, stop)?;
        let xform = CoordinateTransform::new(whole, target, None);
        let mut pieces = Vec::new();
        for page in &self.pages[first..] {
            if page.offset >= stop {
                break;
            }
            let piece = Interval::new(VIRTUAL_AXIS, start.max(page.offset), stop.min(page.end()))?;
            let mapped = xform.apply(&piece)?;
            let local = Interval::new(page.id, piece.start - page.offset, piece.stop - page.offset)?;
            pieces.push((local, mapped));
        }
        Ok(pieces)
    }

    /// Insert an alignment between the virtual LPO axis and `target`.
    pub fn insert_lpo(
        &mut self,
        store: &mut AlignmentStoreBuilder,
        start: i64,
        stop: i64,
        target: Interval,
        edge: Option<Edge>,
    ) -> Result<()> {
        for (local, mapped) in self.split_lpo(start, stop, target)? {
            store.mark_lpo(local.seq);
            store.insert(local, mapped, edge.clone())?;
        }
        Ok(())
    }
}
