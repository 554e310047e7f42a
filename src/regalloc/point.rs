//! Segment points: precise, orderable positions inside a segment.
//!
//! A point pins a liveness boundary to an exact place in a segment's
//! instruction list so that load/store code can later be spliced in at the
//! right spot without re-scanning the instructions. Points are ordered by
//! instruction index, with ties broken by insertion order, which keeps the
//! relative placement of loads and stores pinned to the same instruction
//! deterministic.
//!
//! Two sentinel indices extend the ordering beyond the instruction list:
//! [`ENTRY_INDEX`] sorts before every instruction and marks a live-in
//! boundary, [`EXIT_INDEX`] sorts after every instruction and marks a
//! live-out boundary.
//!
//! The pool is created and destroyed entirely within one register-allocation
//! pass; removed points are only unlinked from their segment's list, the
//! arena entry is not reclaimed.

use crate::ir::Segment;
use core::cmp::Ordering;
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};

/// Point index sorting before the first instruction of a segment.
pub const ENTRY_INDEX: i32 = -1;

/// Point index sorting after the last instruction of a segment.
pub const EXIT_INDEX: i32 = i32::MAX;

/// An opaque reference to a segment point.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point(u32);
entity_impl!(Point, "pt");

/// The position a [`Point`] refers to.
pub struct PointData {
    /// The segment this point lives in.
    pub segment: Segment,
    /// Instruction index within the segment, or one of the sentinels.
    pub index: i32,
    /// Insertion sequence number; breaks ties between points pinned to the
    /// same instruction index.
    pub(crate) slot: u32,
}

/// Arena of points plus the per-segment position-ordered lists.
pub struct PointPool {
    points: PrimaryMap<Point, PointData>,
    by_segment: SecondaryMap<Segment, Vec<Point>>,
    next_slot: u32,
}

impl PointPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            points: PrimaryMap::new(),
            by_segment: SecondaryMap::new(),
            next_slot: 0,
        }
    }

    /// Drop all points. Allocated memory is retained.
    pub fn clear(&mut self) {
        self.points.clear();
        self.by_segment.clear();
        self.next_slot = 0;
    }

    /// Create a point at `index` within `segment`, keeping the segment's
    /// point list sorted.
    pub fn insert(&mut self, segment: Segment, index: i32) -> Point {
        let slot = self.next_slot;
        self.next_slot += 1;
        let point = self.points.push(PointData {
            segment,
            index,
            slot,
        });
        self.insert_into_list(segment, point);
        point
    }

    /// Unlink `point` from its segment's list.
    pub fn remove(&mut self, point: Point) {
        let segment = self.points[point].segment;
        let list = &mut self.by_segment[segment];
        if let Some(pos) = list.iter().position(|&p| p == point) {
            list.remove(pos);
        }
    }

    /// Move `point` to a new index within its segment, re-sorting it behind
    /// any points already pinned there.
    pub fn move_to(&mut self, point: Point, index: i32) {
        if self.points[point].index == index {
            return;
        }
        let segment = self.points[point].segment;
        self.remove(point);
        let slot = self.next_slot;
        self.next_slot += 1;
        {
            let data = &mut self.points[point];
            data.index = index;
            data.slot = slot;
        }
        self.insert_into_list(segment, point);
    }

    /// Compare two points of the same segment by position.
    pub fn cmp(&self, a: Point, b: Point) -> Ordering {
        let (da, db) = (&self.points[a], &self.points[b]);
        debug_assert_eq!(
            da.segment, db.segment,
            "points in different segments are unordered"
        );
        (da.index, da.slot).cmp(&(db.index, db.slot))
    }

    /// The point following `point` in its segment, if any.
    pub fn next(&self, point: Point) -> Option<Point> {
        let list = &self.by_segment[self.points[point].segment];
        let pos = list.iter().position(|&p| p == point)?;
        list.get(pos + 1).copied()
    }

    /// The point preceding `point` in its segment, if any.
    pub fn prev(&self, point: Point) -> Option<Point> {
        let list = &self.by_segment[self.points[point].segment];
        let pos = list.iter().position(|&p| p == point)?;
        list.get(pos.wrapping_sub(1)).copied()
    }

    /// Renumber points at or after `index` by `delta`, after instructions
    /// were spliced into `segment`. Sentinel points are unaffected.
    pub fn shift_from(&mut self, segment: Segment, index: i32, delta: i32) {
        for i in 0..self.by_segment[segment].len() {
            let point = self.by_segment[segment][i];
            let data = &mut self.points[point];
            if data.index >= index && data.index != EXIT_INDEX {
                data.index += delta;
            }
        }
    }

    /// All points of `segment` in position order.
    pub fn segment_points(&self, segment: Segment) -> &[Point] {
        &self.by_segment[segment]
    }

    fn insert_into_list(&mut self, segment: Segment, point: Point) {
        let (index, slot) = {
            let data = &self.points[point];
            (data.index, data.slot)
        };
        let pos = self.by_segment[segment].partition_point(|&p| {
            let d = &self.points[p];
            (d.index, d.slot) <= (index, slot)
        });
        self.by_segment[segment].insert(pos, point);
    }
}

impl Default for PointPool {
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Index<Point> for PointPool {
    type Output = PointData;

    fn index(&self, point: Point) -> &PointData {
        &self.points[point]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SegmentGraph;

    #[test]
    fn points_stay_sorted() {
        let mut graph = SegmentGraph::new();
        let seg = graph.add_segment();
        let mut pool = PointPool::new();

        let p2 = pool.insert(seg, 2);
        let p0 = pool.insert(seg, 0);
        let entry = pool.insert(seg, ENTRY_INDEX);
        let exit = pool.insert(seg, EXIT_INDEX);

        assert_eq!(pool.segment_points(seg), &[entry, p0, p2, exit]);
        assert_eq!(pool.cmp(entry, p0), Ordering::Less);
        assert_eq!(pool.cmp(exit, p2), Ordering::Greater);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut graph = SegmentGraph::new();
        let seg = graph.add_segment();
        let mut pool = PointPool::new();

        let first = pool.insert(seg, 1);
        let second = pool.insert(seg, 1);
        assert_eq!(pool.segment_points(seg), &[first, second]);
        assert_eq!(pool.cmp(first, second), Ordering::Less);
    }

    #[test]
    fn next_prev_and_remove() {
        let mut graph = SegmentGraph::new();
        let seg = graph.add_segment();
        let mut pool = PointPool::new();

        let a = pool.insert(seg, 0);
        let b = pool.insert(seg, 1);
        let c = pool.insert(seg, 2);

        assert_eq!(pool.next(a), Some(b));
        assert_eq!(pool.prev(c), Some(b));
        assert_eq!(pool.prev(a), None);
        assert_eq!(pool.next(c), None);

        pool.remove(b);
        assert_eq!(pool.next(a), Some(c));
        assert_eq!(pool.prev(c), Some(a));
    }

    #[test]
    fn move_to_resorts() {
        let mut graph = SegmentGraph::new();
        let seg = graph.add_segment();
        let mut pool = PointPool::new();

        let a = pool.insert(seg, 0);
        let b = pool.insert(seg, 5);
        pool.move_to(b, ENTRY_INDEX);
        assert_eq!(pool.segment_points(seg), &[b, a]);
    }

    #[test]
    fn shift_renumbers_tail() {
        let mut graph = SegmentGraph::new();
        let seg = graph.add_segment();
        let mut pool = PointPool::new();

        let entry = pool.insert(seg, ENTRY_INDEX);
        let p1 = pool.insert(seg, 1);
        let p3 = pool.insert(seg, 3);
        let exit = pool.insert(seg, EXIT_INDEX);

        // Two instructions spliced in before index 1.
        pool.shift_from(seg, 1, 2);
        assert_eq!(pool[entry].index, ENTRY_INDEX);
        assert_eq!(pool[p1].index, 3);
        assert_eq!(pool[p3].index, 5);
        assert_eq!(pool[exit].index, EXIT_INDEX);
        assert_eq!(pool.segment_points(seg), &[entry, p1, p3, exit]);
    }
}
