use crate::edge::{cmp_optional, Edge};
use crate::error::{NlmsaError, Result};
use crate::interval::{Interval, Orientation};
use crate::transform::CoordinateTransform;
use crate::SeqId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One stored alignment: a source span mapped onto a target span.
///
/// The source is always kept in forward orientation; `target.orientation`
/// carries the relative orientation of the alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub src: Interval,
    pub target: Interval,
    pub edge: Option<Edge>,
}

impl IntervalRecord {
    pub fn new(src: Interval, target: Interval, edge: Option<Edge>) -> Self {
        if src.orientation.is_reverse() {
            IntervalRecord {
                src: src.flip(),
                target: target.flip(),
                edge,
            }
        } else {
            IntervalRecord { src, target, edge }
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.target.orientation
    }

    /// The same alignment seen from the target side.
    pub fn mirrored(&self) -> Self {
        IntervalRecord::new(self.target, self.src, self.edge.clone())
    }

    /// True when source and target are the same span of the same sequence.
    pub fn is_self_mapping(&self) -> bool {
        self.src.seq == self.target.seq
            && self.src.start == self.target.start
            && self.src.stop == self.target.stop
    }

    pub fn transform(&self) -> CoordinateTransform<'_> {
        CoordinateTransform::new(self.src, self.target, self.edge.as_ref())
    }

    /// Layout order inside a containment forest: start ascending, stop
    /// descending, then target and payload so the order is total.
    pub fn layout_cmp(&self, other: &IntervalRecord) -> Ordering {
        self.src
            .start
            .cmp(&other.src.start)
            .then(other.src.stop.cmp(&self.src.stop))
            .then(self.target.seq.cmp(&other.target.seq))
            .then(self.target.orientation.cmp(&other.target.orientation))
            .then(self.target.start.cmp(&other.target.start))
            .then(self.target.stop.cmp(&other.target.stop))
            .then_with(|| cmp_optional(&self.edge, &other.edge))
    }
}

/// Raw tuple handed over by alignment parsers:
/// `(src_start, src_end, target_id, target_start, target_end[, orientation][, payload])`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentTuple {
    pub src_start: i64,
    pub src_end: i64,
    pub target_id: SeqId,
    pub target_start: i64,
    pub target_end: i64,
    pub orientation: Option<Orientation>,
    pub edge: Option<Edge>,
}

impl AlignmentTuple {
    pub fn new(
        src_start: i64,
        src_end: i64,
        target_id: SeqId,
        target_start: i64,
        target_end: i64,
    ) -> Self {
        AlignmentTuple {
            src_start,
            src_end,
            target_id,
            target_start,
            target_end,
            orientation: None,
            edge: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = Some(edge);
        self
    }

    /// Validates half-open ordering and builds the stored record.
    ///
    /// Without an explicit orientation, negative target coordinates denote the
    /// reverse strand (`-stop, -start`), matching the text dump.
    pub fn into_record(self, src_seq: SeqId) -> Result<IntervalRecord> {
        if self.src_start >= self.src_end {
            return Err(NlmsaError::MalformedInterval(format!(
                "source {}-{} on {} is empty or inverted",
                self.src_start, self.src_end, src_seq
            )));
        }
        if self.target_start >= self.target_end {
            return Err(NlmsaError::MalformedInterval(format!(
                "target {}-{} on {} is empty or inverted",
                self.target_start, self.target_end, self.target_id
            )));
        }
        let src = Interval::new(src_seq, self.src_start, self.src_end)?;
        let target = match self.orientation {
            Some(orientation) if self.target_start >= 0 => Interval::with_orientation(
                self.target_id,
                self.target_start,
                self.target_end,
                orientation,
            )?,
            Some(_) => {
                return Err(NlmsaError::MalformedInterval(format!(
                    "target {}-{} mixes an explicit orientation with negative coordinates",
                    self.target_start, self.target_end
                )))
            }
            None => Interval::from_oriented(self.target_id, self.target_start, self.target_end)?,
        };
        Ok(IntervalRecord::new(src, target, self.edge))
    }
}
