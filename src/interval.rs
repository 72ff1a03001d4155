//! Half-open intervals on a sequence, with strand orientation.
//!
//! Reverse-strand intervals still store `start < stop` in forward coordinates;
//! `oriented_coords` gives the negated form used when ordering hits along a
//! reverse-strand target.

use crate::error::{NlmsaError, Result};
use crate::SeqId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strand orientation of an interval
#[derive(
    Default, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Debug, Serialize, Deserialize,
)]
pub enum Orientation {
    #[default]
    Forward,
    Reverse,
}

impl Orientation {
    pub fn sign(self) -> i64 {
        match self {
            Orientation::Forward => 1,
            Orientation::Reverse => -1,
        }
    }

    pub fn from_sign(sign: i64) -> Self {
        if sign < 0 {
            Orientation::Reverse
        } else {
            Orientation::Forward
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reverse,
            Orientation::Reverse => Orientation::Forward,
        }
    }

    pub fn is_reverse(self) -> bool {
        self == Orientation::Reverse
    }

    pub fn as_char(self) -> char {
        match self {
            Orientation::Forward => '+',
            Orientation::Reverse => '-',
        }
    }
}

impl std::ops::Mul for Orientation {
    type Output = Orientation;

    fn mul(self, rhs: Orientation) -> Orientation {
        if self == rhs {
            Orientation::Forward
        } else {
            Orientation::Reverse
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Interval {
    pub seq: SeqId,
    pub start: i64,
    pub stop: i64,
    pub orientation: Orientation,
}

impl Interval {
    /// Forward interval; `start > stop` is normalized to a reverse interval.
    pub fn new(seq: SeqId, start: i64, stop: i64) -> Result<Self> {
        Self::with_orientation(seq, start, stop, Orientation::Forward)
    }

    pub fn with_orientation(
        seq: SeqId,
        start: i64,
        stop: i64,
        orientation: Orientation,
    ) -> Result<Self> {
        match start.cmp(&stop) {
            Ordering::Less => Ok(Interval {
                seq,
                start,
                stop,
                orientation,
            }),
            Ordering::Greater => Ok(Interval {
                seq,
                start: stop,
                stop: start,
                orientation: orientation.flip(),
            }),
            Ordering::Equal => Err(NlmsaError::MalformedInterval(format!(
                "zero-length interval {}:{}-{}",
                seq, start, stop
            ))),
        }
    }

    /// Build from oriented coordinates, where a reverse interval is written as
    /// `(-stop, -start)`.
    pub fn from_oriented(seq: SeqId, start: i64, stop: i64) -> Result<Self> {
        if start < 0 && stop <= 0 {
            Self::with_orientation(seq, -stop, -start, Orientation::Reverse)
        } else if start >= 0 && stop >= 0 {
            Self::with_orientation(seq, start, stop, Orientation::Forward)
        } else {
            Err(NlmsaError::MalformedInterval(format!(
                "oriented interval {}:{}-{} crosses zero",
                seq, start, stop
            )))
        }
    }

    pub fn oriented_coords(&self) -> (i64, i64) {
        match self.orientation {
            Orientation::Forward => (self.start, self.stop),
            Orientation::Reverse => (-self.stop, -self.start),
        }
    }

    pub fn len(&self) -> i64 {
        self.stop - self.start
    }

    /// Normalized intervals are never empty.
    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    pub fn flip(&self) -> Self {
        Interval {
            orientation: self.orientation.flip(),
            ..*self
        }
    }

    pub fn as_forward(&self) -> Self {
        Interval {
            orientation: Orientation::Forward,
            ..*self
        }
    }

    pub fn same_path(&self, other: &Interval) -> Result<()> {
        if self.seq == other.seq {
            Ok(())
        } else {
            Err(NlmsaError::PathMismatch(format!(
                "{} and {} lie on different sequences",
                self, other
            )))
        }
    }

    pub fn overlaps_span(&self, start: i64, stop: i64) -> bool {
        self.start < stop && start < self.stop
    }

    pub fn overlaps(&self, other: &Interval) -> Result<bool> {
        self.same_path(other)?;
        Ok(self.overlaps_span(other.start, other.stop))
    }

    pub fn contains(&self, other: &Interval) -> Result<bool> {
        self.same_path(other)?;
        Ok(self.start <= other.start && other.stop <= self.stop)
    }

    /// Intersection, keeping this interval's orientation.
    pub fn intersect(&self, other: &Interval) -> Result<Option<Interval>> {
        self.same_path(other)?;
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        if start < stop {
            Ok(Some(Interval {
                seq: self.seq,
                start,
                stop,
                orientation: self.orientation,
            }))
        } else {
            Ok(None)
        }
    }

    /// Smallest interval covering both.
    pub fn span(&self, other: &Interval) -> Result<Interval> {
        self.same_path(other)?;
        Ok(Interval {
            seq: self.seq,
            start: self.start.min(other.start),
            stop: self.stop.max(other.stop),
            orientation: self.orientation,
        })
    }

    /// Orders by `(start, stop)`; intervals on different paths are not comparable.
    pub fn try_cmp(&self, other: &Interval) -> Result<Ordering> {
        self.same_path(other)?;
        Ok((self.start, self.stop).cmp(&(other.start, other.stop)))
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}-{}({})",
            self.seq,
            self.start,
            self.stop,
            self.orientation.as_char()
        )
    }
}
