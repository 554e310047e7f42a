//! Data structures representing the live range of a virtual register.
//!
//! The lifetime of one virtual register is tracked as a [`LiveRange`]
//! owning a set of [`Subrange`]s, at most one per segment. Inside a single
//! segment a subrange is an interval between two segment points; its
//! boundaries are either real touch positions or the entry/exit sentinels
//! when the value is live across the segment border.
//!
//! # Dirty state
//!
//! A register's in-register value can run ahead of its backing slot in the
//! guest register file. The flags on a subrange record where the emission
//! stage must place loads and stores:
//!
//! - `no_load`: the value is already resident at subrange entry (defined
//!   here by a write, or carried in from a linked predecessor subrange).
//! - `has_store`: the value must be flushed before control leaves the
//!   subrange.
//! - `has_store_delayed`: the flush is deferred to the linked continuation
//!   subrange(s), all of which are dirty themselves; this collapses
//!   redundant store/load pairs across segment boundaries.
//!
//! # Register interference
//!
//! Two live ranges interfere when any of their subranges overlap within the
//! same segment. Overlap is closed-interval under the point order, so a
//! range ending at an instruction that starts another range still
//! interferes; the splicing of loads and stores around an instruction is
//! decided after assignment and cannot be reasoned about here.

use crate::ir::{PhysReg, Segment, VirtReg};
use crate::regalloc::point::{Point, PointPool, ENTRY_INDEX, EXIT_INDEX};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use smallvec::{smallvec, SmallVec};

/// An opaque reference to the full lifetime of one virtual register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveRange(u32);
entity_impl!(LiveRange, "range");

/// An opaque reference to the part of a lifetime inside one segment.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subrange(u32);
entity_impl!(Subrange, "sub");

/// One instruction inside a subrange that reads or writes the register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TouchPoint {
    /// Instruction index within the segment.
    pub index: i32,
    /// The instruction reads the register.
    pub is_read: bool,
    /// The instruction writes the register.
    pub is_write: bool,
}

/// The span of one virtual register's liveness within one segment.
pub struct SubrangeData {
    /// The range this subrange belongs to. Filled in during range assembly;
    /// a back-reference only, the arena owns both.
    pub range: PackedOption<LiveRange>,
    /// The virtual register this subrange tracks.
    pub vreg: VirtReg,
    /// The segment this subrange lives in.
    pub segment: Segment,
    /// First point of the span. The entry sentinel when live-in.
    pub start: Point,
    /// Last point of the span. The exit sentinel when live-out.
    pub end: Point,
    /// Every read/write of the register inside the span, in order.
    pub touches: SmallVec<[TouchPoint; 4]>,
    /// No load is needed at entry to this subrange.
    pub no_load: bool,
    /// The value must be flushed before control leaves this subrange.
    pub has_store: bool,
    /// The flush is deferred into the continuation subrange(s).
    pub has_store_delayed: bool,
    /// Continuation along the owning segment's branch-taken edge.
    pub branch_taken: PackedOption<Subrange>,
    /// Continuation along the owning segment's branch-not-taken edge.
    pub branch_not_taken: PackedOption<Subrange>,
    pub(crate) has_incoming: bool,
}

impl SubrangeData {
    /// Whether the subrange begins at the segment entry.
    pub fn is_live_in(&self, points: &PointPool) -> bool {
        points[self.start].index == ENTRY_INDEX
    }

    /// Whether the subrange extends to the segment exit.
    pub fn is_live_out(&self, points: &PointPool) -> bool {
        points[self.end].index == EXIT_INDEX
    }

    /// Whether any instruction in the span writes the register.
    pub fn is_locally_dirty(&self) -> bool {
        self.touches.iter().any(|t| t.is_write)
    }
}

/// The full lifetime of one virtual register across the function.
pub struct LiveRangeData {
    /// The virtual register this range describes.
    pub vreg: VirtReg,
    /// Logical slot alias, for lifetimes that share a physical slot with
    /// other virtual registers at different times.
    pub name: Option<u32>,
    /// The physical register assigned by the allocation pass.
    pub phys_reg: Option<PhysReg>,
    /// All subranges of this range, ordered by segment position.
    pub subranges: Vec<Subrange>,
}

impl LiveRangeData {
    pub(crate) fn new(vreg: VirtReg) -> Self {
        Self {
            vreg,
            name: None,
            phys_reg: None,
            subranges: Vec::new(),
        }
    }
}

/// Arena of ranges, subranges, and points for one compilation.
///
/// Everything in here is created and destroyed within one
/// register-allocation pass; nothing outlives the function's recompilation.
pub struct Liveness {
    pub(crate) ranges: PrimaryMap<LiveRange, LiveRangeData>,
    pub(crate) subranges: PrimaryMap<Subrange, SubrangeData>,
    pub(crate) points: PointPool,
    pub(crate) vreg_range: SecondaryMap<VirtReg, PackedOption<LiveRange>>,
}

impl Liveness {
    /// Create an empty liveness arena.
    pub fn new() -> Self {
        Self {
            ranges: PrimaryMap::new(),
            subranges: PrimaryMap::new(),
            points: PointPool::new(),
            vreg_range: SecondaryMap::new(),
        }
    }

    /// Drop all liveness data. Allocated memory is retained so the arena
    /// can be reused for the next function.
    pub fn clear(&mut self) {
        self.ranges.clear();
        self.subranges.clear();
        self.points.clear();
        self.vreg_range.clear();
    }

    /// The range of `vreg`, if the register is used at all.
    pub fn range_of(&self, vreg: VirtReg) -> Option<LiveRange> {
        self.vreg_range[vreg].expand()
    }

    /// Data of one range.
    pub fn range(&self, range: LiveRange) -> &LiveRangeData {
        &self.ranges[range]
    }

    /// Data of one subrange.
    pub fn subrange(&self, subrange: Subrange) -> &SubrangeData {
        &self.subranges[subrange]
    }

    /// Iterate over all ranges.
    pub fn ranges(&self) -> cranelift_entity::Keys<LiveRange> {
        self.ranges.keys()
    }

    /// Iterate over all subranges.
    pub fn subranges(&self) -> cranelift_entity::Keys<Subrange> {
        self.subranges.keys()
    }

    /// The point pool backing subrange boundaries.
    pub fn points(&self) -> &PointPool {
        &self.points
    }

    /// Whether two subranges overlap within the same segment.
    ///
    /// Subranges in different segments never overlap; within a segment the
    /// comparison is closed-interval over instruction indices. Point slots
    /// only order load/store splice positions, they don't affect
    /// interference.
    pub fn local_overlap(&self, a: Subrange, b: Subrange) -> bool {
        let (da, db) = (&self.subranges[a], &self.subranges[b]);
        if da.segment != db.segment {
            return false;
        }
        let (start_a, end_a) = (self.points[da.start].index, self.points[da.end].index);
        let (start_b, end_b) = (self.points[db.start].index, self.points[db.end].index);
        start_a <= end_b && start_b <= end_a
    }

    /// Open a subrange for `vreg` at its first touch in `segment`.
    pub(crate) fn open_subrange(
        &mut self,
        segment: Segment,
        vreg: VirtReg,
        index: i32,
        is_read: bool,
        is_write: bool,
    ) -> Subrange {
        let start = self.points.insert(segment, index);
        let end = self.points.insert(segment, index);
        self.subranges.push(SubrangeData {
            range: None.into(),
            vreg,
            segment,
            start,
            end,
            touches: smallvec![TouchPoint {
                index,
                is_read,
                is_write,
            }],
            no_load: false,
            has_store: false,
            has_store_delayed: false,
            branch_taken: None.into(),
            branch_not_taken: None.into(),
            has_incoming: false,
        })
    }

    /// Open a pass-through subrange spanning all of `segment` with no
    /// touches, for a register live through the segment.
    pub(crate) fn open_passthrough(&mut self, segment: Segment, vreg: VirtReg) -> Subrange {
        let start = self.points.insert(segment, ENTRY_INDEX);
        let end = self.points.insert(segment, EXIT_INDEX);
        self.subranges.push(SubrangeData {
            range: None.into(),
            vreg,
            segment,
            start,
            end,
            touches: SmallVec::new(),
            no_load: false,
            has_store: false,
            has_store_delayed: false,
            branch_taken: None.into(),
            branch_not_taken: None.into(),
            has_incoming: false,
        })
    }

    /// Record another touch of an open subrange, extending its end.
    pub(crate) fn extend_subrange(
        &mut self,
        subrange: Subrange,
        index: i32,
        is_read: bool,
        is_write: bool,
    ) {
        let end = self.subranges[subrange].end;
        let merged = match self.subranges[subrange].touches.last_mut() {
            Some(touch) if touch.index == index => {
                touch.is_read |= is_read;
                touch.is_write |= is_write;
                true
            }
            _ => false,
        };
        if !merged {
            self.subranges[subrange].touches.push(TouchPoint {
                index,
                is_read,
                is_write,
            });
            self.points.move_to(end, index);
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
