//! Nested containment forest over the source spans of alignment records.
//!
//! All nodes live in one flat vector. The roots occupy `nodes[..n_roots]`;
//! every other level is a contiguous block addressed by its parent's
//! `children_start`/`children_len`. Records sit in a separate vector sorted by
//! `(start asc, stop desc, target, payload)`, and each node owns a contiguous
//! run of them (all records sharing that exact source span).

use crate::alignment_record::IntervalRecord;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    start: i64,
    stop: i64,
    records_start: usize,
    records_len: usize,
    children_start: usize,
    children_len: usize,
}

impl Node {
    fn children(&self) -> (usize, usize) {
        (self.children_start, self.children_start + self.children_len)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainmentForest {
    nodes: Vec<Node>,
    n_roots: usize,
    records: Vec<IntervalRecord>,
}

impl ContainmentForest {
    pub fn build(mut records: Vec<IntervalRecord>) -> Self {
        records.sort_by(|a, b| a.layout_cmp(b));

        // One node per distinct source span; records with the same span are
        // adjacent after sorting.
        let mut spans: Vec<(i64, i64, usize, usize)> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            match spans.last_mut() {
                Some(last) if last.0 == record.src.start && last.1 == record.src.stop => {
                    last.3 += 1;
                }
                _ => spans.push((record.src.start, record.src.stop, i, 1)),
            }
        }

        // Containers precede their contents in this order, so the parent of
        // span j is found by chasing parents back from j - 1.
        let mut parent: Vec<Option<usize>> = Vec::with_capacity(spans.len());
        for j in 0..spans.len() {
            let mut k = j.checked_sub(1);
            while let Some(kk) = k {
                if spans[kk].1 >= spans[j].1 {
                    break;
                }
                k = parent[kk];
            }
            parent.push(k);
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); spans.len()];
        let mut roots = Vec::new();
        for (j, p) in parent.iter().enumerate() {
            match p {
                Some(p) => children[*p].push(j),
                None => roots.push(j),
            }
        }

        // Breadth-first layout: each sibling group lands contiguously.
        let n_roots = roots.len();
        let mut order = roots;
        let mut nodes = Vec::with_capacity(spans.len());
        let mut i = 0;
        while i < order.len() {
            let span = order[i];
            let (start, stop, records_start, records_len) = spans[span];
            let children_start = order.len();
            order.extend_from_slice(&children[span]);
            nodes.push(Node {
                start,
                stop,
                records_start,
                records_len,
                children_start,
                children_len: children[span].len(),
            });
            i += 1;
        }

        debug!(
            "Built containment forest: {} records, {} nodes, {} roots",
            records.len(),
            nodes.len(),
            n_roots
        );

        ContainmentForest {
            nodes,
            n_roots,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_count(&self) -> usize {
        self.n_roots
    }

    /// Records in ascending source order.
    pub fn walk(&self) -> std::slice::Iter<'_, IntervalRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<IntervalRecord> {
        self.records
    }

    /// Every record whose source span overlaps `[start, stop)`.
    pub fn overlaps(&self, start: i64, stop: i64) -> Overlaps<'_> {
        let mut iter = Overlaps {
            forest: self,
            start,
            stop,
            stack: Vec::new(),
            pending: self.records[..0].iter(),
        };
        if start < stop {
            iter.push_level(0, self.n_roots);
        }
        iter
    }

    /// Deepest nesting level, 0 for an empty forest.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut level = vec![(0, self.n_roots)];
        while !level.is_empty() {
            depth += 1;
            level = level
                .iter()
                .flat_map(|&(lo, hi)| self.nodes[lo..hi].iter())
                .filter(|n| n.children_len > 0)
                .map(Node::children)
                .collect();
            if level.is_empty() && self.nodes.is_empty() {
                depth = 0;
            }
        }
        depth
    }

    /// Checks the structural invariants: siblings are sorted by `(start, stop)`,
    /// no sibling contains another, children lie inside their parent, and
    /// every node's records carry the node's span.
    pub fn is_well_formed(&self) -> bool {
        let mut seen = 0;
        let mut level = vec![(None::<(i64, i64)>, 0, self.n_roots)];
        while let Some((parent, lo, hi)) = level.pop() {
            if hi > self.nodes.len() {
                return false;
            }
            let siblings = &self.nodes[lo..hi];
            for pair in siblings.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                if (a.start, a.stop) >= (b.start, b.stop) || b.stop <= a.stop {
                    return false;
                }
            }
            for node in siblings {
                seen += 1;
                if let Some((ps, pe)) = parent {
                    if node.start < ps || node.stop > pe || (node.start, node.stop) == (ps, pe) {
                        return false;
                    }
                }
                let records = &self.records[node.records_start..node.records_start + node.records_len];
                if records.is_empty()
                    || records
                        .iter()
                        .any(|r| r.src.start != node.start || r.src.stop != node.stop)
                {
                    return false;
                }
                if node.children_len > 0 {
                    let (clo, chi) = node.children();
                    level.push((Some((node.start, node.stop)), clo, chi));
                }
            }
        }
        seen == self.nodes.len()
    }
}

/// Lazy overlap query over a [`ContainmentForest`], in preorder.
///
/// Holds one `(position, level_end)` frame per open level instead of
/// recursing, so it can be dropped or restarted at any point.
pub struct Overlaps<'a> {
    forest: &'a ContainmentForest,
    start: i64,
    stop: i64,
    stack: Vec<(usize, usize)>,
    pending: std::slice::Iter<'a, IntervalRecord>,
}

impl<'a> Overlaps<'a> {
    fn push_level(&mut self, lo: usize, hi: usize) {
        // Siblings never contain each other, so they are sorted by stop as
        // well as start: everything before `first` ends at or before the query.
        let start = self.start;
        let first = lo + self.forest.nodes[lo..hi].partition_point(|n| n.stop <= start);
        if first < hi {
            self.stack.push((first, hi));
        }
    }
}

impl<'a> Iterator for Overlaps<'a> {
    type Item = &'a IntervalRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                return Some(record);
            }
            let forest = self.forest;
            let frame = self.stack.last_mut()?;
            let (pos, end) = *frame;
            if pos >= end || forest.nodes[pos].start >= self.stop {
                self.stack.pop();
                continue;
            }
            frame.0 += 1;
            let node = &forest.nodes[pos];
            self.pending =
                forest.records[node.records_start..node.records_start + node.records_len].iter();
            if node.children_len > 0 {
                let (lo, hi) = node.children();
                self.push_level(lo, hi);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use coitrees::{BasicCOITree, Interval as CoiInterval, IntervalTree};
    use proptest::prelude::*;

    fn record(start: i64, stop: i64, target_start: i64) -> IntervalRecord {
        IntervalRecord::new(
            Interval::new(0, start, stop).unwrap(),
            Interval::new(1, target_start, target_start + (stop - start)).unwrap(),
            None,
        )
    }

    fn spans(iter: Overlaps<'_>) -> Vec<(i64, i64, i64)> {
        let mut v: Vec<_> = iter
            .map(|r| (r.src.start, r.src.stop, r.target.start))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_empty_forest() {
        let forest = ContainmentForest::build(Vec::new());
        assert!(forest.is_empty());
        assert_eq!(forest.overlaps(0, 100).count(), 0);
        assert_eq!(forest.depth(), 0);
        assert!(forest.is_well_formed());
    }

    #[test]
    fn test_nesting() {
        let forest = ContainmentForest::build(vec![
            record(10, 20, 0),
            record(0, 100, 0),
            record(50, 60, 0),
            record(5, 30, 0),
            record(90, 150, 0),
        ]);
        assert!(forest.is_well_formed());
        // [0,100) and [90,150) are roots; [5,30) under [0,100); [10,20) under [5,30)
        assert_eq!(forest.root_count(), 2);
        assert_eq!(forest.depth(), 3);
        assert_eq!(
            spans(forest.overlaps(25, 55)),
            vec![(0, 100, 0), (5, 30, 0), (50, 60, 0)]
        );
        assert_eq!(spans(forest.overlaps(100, 101)), vec![(90, 150, 0)]);
        assert_eq!(spans(forest.overlaps(150, 200)), vec![]);
    }

    #[test]
    fn test_identical_spans_share_a_node() {
        let forest = ContainmentForest::build(vec![
            record(0, 10, 300),
            record(0, 10, 100),
            record(0, 10, 200),
        ]);
        assert_eq!(forest.node_count(), 1);
        let targets: Vec<i64> = forest.overlaps(0, 10).map(|r| r.target.start).collect();
        assert_eq!(targets, vec![100, 200, 300]);
    }

    #[test]
    fn test_walk_is_sorted_by_start() {
        let forest = ContainmentForest::build(vec![
            record(40, 50, 0),
            record(0, 100, 0),
            record(10, 20, 0),
        ]);
        let starts: Vec<i64> = forest.walk().map(|r| r.src.start).collect();
        assert_eq!(starts, vec![0, 10, 40]);
    }

    #[test]
    fn test_query_is_restartable() {
        let forest = ContainmentForest::build(vec![record(0, 10, 0), record(5, 15, 0)]);
        let first: Vec<_> = forest.overlaps(0, 20).collect();
        let second: Vec<_> = forest.overlaps(0, 20).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    fn arb_records() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((0i64..500, 1i64..120), 0..80)
            .prop_map(|v| v.into_iter().map(|(s, l)| (s, s + l)).collect())
    }

    proptest! {
        #[test]
        fn prop_containment_invariant(spans in arb_records()) {
            let records: Vec<_> = spans.iter().enumerate().map(|(i, &(s, e))| record(s, e, i as i64)).collect();
            let forest = ContainmentForest::build(records);
            prop_assert!(forest.is_well_formed());
            prop_assert_eq!(forest.len(), spans.len());
        }

        #[test]
        fn prop_matches_coitree(spans in arb_records(), qs in 0i64..600, ql in 1i64..200) {
            let records: Vec<_> = spans.iter().enumerate().map(|(i, &(s, e))| record(s, e, i as i64)).collect();
            let forest = ContainmentForest::build(records);

            let coi_nodes: Vec<CoiInterval<i64>> = spans
                .iter()
                .enumerate()
                .map(|(i, &(s, e))| CoiInterval::new(s as i32, (e - 1) as i32, i as i64))
                .collect();
            let tree: BasicCOITree<i64, u32> = BasicCOITree::new(coi_nodes.as_slice());
            let mut expected = Vec::new();
            tree.query(qs as i32, (qs + ql - 1) as i32, |iv| {
                expected.push(iv.metadata.clone());
            });
            expected.sort();

            let mut found: Vec<i64> = forest.overlaps(qs, qs + ql).map(|r| r.target.start).collect();
            found.sort();
            prop_assert_eq!(found, expected);
        }

        #[test]
        fn prop_insertion_order_independent(spans in arb_records(), seed in any::<u64>()) {
            let records: Vec<_> = spans.iter().enumerate().map(|(i, &(s, e))| record(s, e, (i % 7) as i64)).collect();
            let mut shuffled = records.clone();
            // deterministic Fisher-Yates driven by the seed
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            prop_assert_eq!(ContainmentForest::build(records), ContainmentForest::build(shuffled));
        }
    }
}
