//! Merge-join of two alignment stores over a shared anchor sequence.
//!
//! If one store aligns `anchor -> X` and the other `anchor -> Y`, every overlap
//! on the anchor yields an `X -> Y` mapping restricted to that overlap.

use crate::alignment_record::IntervalRecord;
use crate::error::{NlmsaError, Result};
use crate::index::IntervalIndex;
use crate::interval::Interval;
use crate::store::{AlignmentStore, AlignmentStoreBuilder};
use crate::SeqId;
use log::{debug, info};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedPair {
    /// Overlap on the shared anchor.
    pub anchor: Interval,
    /// The overlap projected through the left store's alignment.
    pub src: Interval,
    /// The overlap projected through the right store's alignment.
    pub dest: Interval,
}

/// Sweep two anchor indexes in walk order. Each `(x, y)` overlap is emitted
/// once, in ascending order of `y`'s start on the anchor.
fn sweep(a: &IntervalIndex, b: &IntervalIndex) -> Result<Vec<JoinedPair>> {
    let mut a_stream = a.walk().peekable();
    let mut queue: Vec<&IntervalRecord> = Vec::new();
    let mut pairs = Vec::new();
    for y in b.walk() {
        queue.retain(|x| x.src.stop > y.src.start);
        while let Some(x) = a_stream.next_if(|x| x.src.start < y.src.stop) {
            // later `y`s start no earlier, so an `x` ending here is never needed
            if x.src.stop > y.src.start {
                queue.push(x);
            }
        }
        for x in &queue {
            let Some(anchor) = x.src.intersect(&y.src)? else {
                continue;
            };
            pairs.push(JoinedPair {
                anchor,
                src: x.transform().apply(&anchor)?,
                dest: y.transform().apply(&anchor)?,
            });
        }
    }
    Ok(pairs)
}

/// Join `a` and `b` on one anchor path present in both.
pub fn intersect_on(a: &AlignmentStore, b: &AlignmentStore, anchor: SeqId) -> Result<Vec<JoinedPair>> {
    let (Ok(left), Ok(right)) = (a.get(anchor), b.get(anchor)) else {
        return Err(NlmsaError::PathMismatch(format!(
            "anchor {} is not indexed in both stores",
            anchor
        )));
    };
    let pairs = sweep(left, right)?;
    debug!("Intersection on {} produced {} pairs", anchor, pairs.len());
    Ok(pairs)
}

/// Join on every shared path, collecting the projected pairs into a new store.
pub fn intersect(a: &AlignmentStore, b: &AlignmentStore) -> Result<AlignmentStore> {
    let shared: Vec<SeqId> = a.paths().into_iter().filter(|&p| b.contains_path(p)).collect();
    if shared.is_empty() {
        return Err(NlmsaError::PathMismatch(
            "the stores share no anchor sequence".to_string(),
        ));
    }
    let joined: Vec<Result<Vec<JoinedPair>>> = shared
        .par_iter()
        .map(|&anchor| intersect_on(a, b, anchor))
        .collect();

    let mut builder = AlignmentStoreBuilder::new();
    for pairs in joined {
        for pair in pairs? {
            builder.insert(pair.src, pair.dest, None)?;
        }
    }
    info!(
        "Intersected {} shared anchors into {} alignments",
        shared.len(),
        builder.len()
    );
    Ok(builder.freeze())
}

/// Operand of [`join`]. A bare interval is accepted by the type but not joinable.
#[derive(Debug, Clone, Copy)]
pub enum JoinOperand<'a> {
    Store(&'a AlignmentStore),
    Interval(Interval),
}

pub fn join(a: JoinOperand<'_>, b: JoinOperand<'_>) -> Result<AlignmentStore> {
    match (a, b) {
        (JoinOperand::Store(a), JoinOperand::Store(b)) => intersect(a, b),
        (JoinOperand::Interval(ival), _) | (_, JoinOperand::Interval(ival)) => {
            Err(NlmsaError::UnsupportedJoin(format!(
                "{} is an interval, not an alignment store",
                ival
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Orientation;

    const A: SeqId = 0;
    const B: SeqId = 1;
    const C: SeqId = 2;

    fn fwd(seq: SeqId, s: i64, e: i64) -> Interval {
        Interval::new(seq, s, e).unwrap()
    }

    #[test]
    fn test_transitive_join() {
        let mut left = AlignmentStoreBuilder::bidirectional();
        left.insert(fwd(A, 0, 10), fwd(B, 0, 10), None).unwrap();
        let mut right = AlignmentStoreBuilder::new();
        right.insert(fwd(B, 0, 10), fwd(C, 0, 10), None).unwrap();
        let (left, right) = (left.freeze(), right.freeze());

        let pairs = intersect_on(&left, &right, B).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].src, fwd(A, 0, 10));
        assert_eq!(pairs[0].dest, fwd(C, 0, 10));

        let joined = intersect(&left, &right).unwrap();
        let hits: Vec<_> = joined.query(&fwd(A, 0, 10)).unwrap().collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, fwd(C, 0, 10));
        assert!(hits[0].edge.is_none());
    }

    #[test]
    fn test_partial_overlaps_are_clipped() {
        let mut left = AlignmentStoreBuilder::new();
        left.insert(fwd(B, 0, 50), fwd(A, 100, 150), None).unwrap();
        left.insert(fwd(B, 60, 80), fwd(A, 500, 520), None).unwrap();
        let mut right = AlignmentStoreBuilder::new();
        right
            .insert(
                fwd(B, 40, 70),
                Interval::with_orientation(C, 0, 30, Orientation::Reverse).unwrap(),
                None,
            )
            .unwrap();
        let pairs = intersect_on(&left.freeze(), &right.freeze(), B).unwrap();
        let summary: Vec<_> = pairs.iter().map(|p| (p.anchor, p.src, p.dest)).collect();
        assert_eq!(
            summary,
            vec![
                (
                    fwd(B, 40, 50),
                    fwd(A, 140, 150),
                    Interval::with_orientation(C, 20, 30, Orientation::Reverse).unwrap()
                ),
                (
                    fwd(B, 60, 70),
                    fwd(A, 500, 510),
                    Interval::with_orientation(C, 0, 10, Orientation::Reverse).unwrap()
                ),
            ]
        );
    }

    #[test]
    fn test_sweep_matches_brute_force() {
        let mut left = AlignmentStoreBuilder::new();
        let mut right = AlignmentStoreBuilder::new();
        let spans = [(0, 100), (5, 20), (10, 15), (30, 90), (95, 120), (200, 210)];
        for (i, &(s, e)) in spans.iter().enumerate() {
            left.insert(fwd(B, s, e), fwd(A, s + 1000, e + 1000), None).unwrap();
            right
                .insert(fwd(B, s + i as i64, e + 2), fwd(C, s, e + 2 - i as i64), None)
                .unwrap();
        }
        let (left, right) = (left.freeze(), right.freeze());
        let pairs = intersect_on(&left, &right, B).unwrap();

        let mut expected = 0;
        for x in left.get(B).unwrap().walk() {
            for y in right.get(B).unwrap().walk() {
                if x.src.overlaps(&y.src).unwrap() {
                    expected += 1;
                }
            }
        }
        assert_eq!(pairs.len(), expected);
        assert!(pairs.iter().all(|p| p.src.len() == p.anchor.len()));
    }

    #[test]
    fn test_missing_anchor_and_bare_interval() {
        let mut left = AlignmentStoreBuilder::new();
        left.insert(fwd(A, 0, 10), fwd(B, 0, 10), None).unwrap();
        let mut right = AlignmentStoreBuilder::new();
        right.insert(fwd(B, 0, 10), fwd(C, 0, 10), None).unwrap();
        let (left, right) = (left.freeze(), right.freeze());

        assert!(matches!(
            intersect(&left, &right),
            Err(NlmsaError::PathMismatch(_))
        ));
        assert!(matches!(
            intersect_on(&left, &right, B),
            Err(NlmsaError::PathMismatch(_))
        ));
        assert!(matches!(
            join(JoinOperand::Store(&left), JoinOperand::Interval(fwd(B, 0, 10))),
            Err(NlmsaError::UnsupportedJoin(_))
        ));
    }
}
