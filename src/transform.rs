//! Affine coordinate mapping between two aligned intervals.
//!
//! The mapping uses exact integer arithmetic on the ratio
//! `len(dest) / len(src)`:
//!
//! - forward: `xform(i) = dest.start + floor((i - src.start) * ld / ls)`
//! - reverse: `xform(i) = dest.stop - 1 - floor((i - src.start) * ld / ls)`
//!
//! `xform_back` returns the smallest source position that maps onto a
//! destination position. `xform_back(xform(x)) == x` holds exactly whenever
//! `ld >= ls`; when the destination is shorter several source positions share
//! one destination position and the round trip can land up to
//! `ceil(ls / ld) - 1` positions early (at most 1 for `ld >= ls / 2`).
//! Callers that need exact coordinates use [`CoordinateTransform::exact`], which
//! turns every inexact boundary into [`NlmsaError::RoundingAmbiguity`].

use crate::edge::{Edge, EdgeInfo, Value};
use crate::error::{NlmsaError, Result};
use crate::interval::{Interval, Orientation};
use crate::SeqId;

fn floor_div(n: i128, d: i128) -> i128 {
    let q = n / d;
    if (n % d != 0) && ((n < 0) != (d < 0)) {
        q - 1
    } else {
        q
    }
}

fn ceil_div(n: i128, d: i128) -> i128 {
    -floor_div(-n, d)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform<'a> {
    src: Interval,
    dest: Interval,
    edge: Option<&'a Edge>,
    orientation: Orientation,
    exact: bool,
}

impl<'a> CoordinateTransform<'a> {
    pub fn new(src: Interval, dest: Interval, edge: Option<&'a Edge>) -> Self {
        CoordinateTransform {
            src,
            dest,
            edge,
            orientation: src.orientation * dest.orientation,
            exact: false,
        }
    }

    /// Strict variant: boundaries that do not map onto integers are errors.
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn src(&self) -> &Interval {
        &self.src
    }

    pub fn dest(&self) -> &Interval {
        &self.dest
    }

    pub fn src_path(&self) -> SeqId {
        self.src.seq
    }

    pub fn dest_path(&self) -> SeqId {
        self.dest.seq
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Signed scale factor, for display; mapping never goes through floats.
    pub fn scale(&self) -> f64 {
        self.orientation.sign() as f64 * self.dest.len() as f64 / self.src.len() as f64
    }

    /// Offset such that `scale * src.start + offset` is the image of `src.start`.
    pub fn offset(&self) -> f64 {
        let anchor = match self.orientation {
            Orientation::Forward => self.dest.start,
            Orientation::Reverse => self.dest.stop - 1,
        };
        anchor as f64 - self.scale() * self.src.start as f64
    }

    pub fn is_integral(&self) -> bool {
        self.dest.len() % self.src.len() == 0
    }

    pub fn edge(&self) -> Result<&'a Edge> {
        self.edge
            .ok_or_else(|| NlmsaError::NoSuchAttribute("edge".to_string()))
    }

    fn scaled(&self, delta: i64, num: i64, den: i64, round_up: bool, pos: i64) -> Result<i64> {
        let n = delta as i128 * num as i128;
        let d = den as i128;
        if self.exact && n % d != 0 {
            return Err(NlmsaError::RoundingAmbiguity {
                position: pos,
                numerator: num as i128,
                denominator: d,
            });
        }
        let q = if round_up {
            ceil_div(n, d)
        } else {
            floor_div(n, d)
        };
        Ok(q as i64)
    }

    pub fn try_xform(&self, i: i64) -> Result<i64> {
        let q = self.scaled(i - self.src.start, self.dest.len(), self.src.len(), false, i)?;
        Ok(match self.orientation {
            Orientation::Forward => self.dest.start + q,
            Orientation::Reverse => self.dest.stop - 1 - q,
        })
    }

    pub fn xform(&self, i: i64) -> i64 {
        let q = floor_div(
            (i - self.src.start) as i128 * self.dest.len() as i128,
            self.src.len() as i128,
        ) as i64;
        match self.orientation {
            Orientation::Forward => self.dest.start + q,
            Orientation::Reverse => self.dest.stop - 1 - q,
        }
    }

    pub fn xform_back(&self, j: i64) -> i64 {
        let u = match self.orientation {
            Orientation::Forward => j - self.dest.start,
            Orientation::Reverse => self.dest.stop - 1 - j,
        };
        self.src.start
            + ceil_div(u as i128 * self.src.len() as i128, self.dest.len() as i128) as i64
    }

    /// Map a sub-interval of the source onto the destination path.
    pub fn apply(&self, sub: &Interval) -> Result<Interval> {
        sub.same_path(&self.src)?;
        let (ls, ld) = (self.src.len(), self.dest.len());
        let lo = self.scaled(sub.start - self.src.start, ld, ls, false, sub.start)?;
        let hi = self.scaled(sub.stop - self.src.start, ld, ls, true, sub.stop)?;
        let (start, stop) = match self.orientation {
            Orientation::Forward => (self.dest.start + lo, self.dest.start + hi),
            Orientation::Reverse => (self.dest.stop - hi, self.dest.stop - lo),
        };
        Interval::with_orientation(
            self.dest.seq,
            start,
            stop,
            sub.orientation * self.src.orientation * self.dest.orientation,
        )
    }

    /// Map a sub-interval of the destination back onto the source path.
    pub fn reverse(&self, sub: &Interval) -> Result<Interval> {
        sub.same_path(&self.dest)?;
        let (ls, ld) = (self.src.len(), self.dest.len());
        let (u_lo, u_hi) = match self.orientation {
            Orientation::Forward => (sub.start - self.dest.start, sub.stop - self.dest.start),
            Orientation::Reverse => (self.dest.stop - sub.stop, self.dest.stop - sub.start),
        };
        let lo = self.scaled(u_lo, ls, ld, false, sub.start)?;
        let hi = self.scaled(u_hi, ls, ld, true, sub.stop)?;
        Interval::with_orientation(
            self.src.seq,
            self.src.start + lo,
            self.src.start + hi,
            sub.orientation * self.dest.orientation * self.src.orientation,
        )
    }

    /// Restrict `sub` to the source interval, then map it.
    pub fn clip(&self, sub: &Interval) -> Result<Option<Interval>> {
        match sub.intersect(&self.src)? {
            Some(inside) => self.apply(&inside).map(Some),
            None => Ok(None),
        }
    }
}

impl EdgeInfo for CoordinateTransform<'_> {
    fn attr(&self, name: &str) -> Result<Value> {
        match self.edge {
            Some(edge) => edge.attr(name),
            None => Err(NlmsaError::NoSuchAttribute(name.to_string())),
        }
    }
}
