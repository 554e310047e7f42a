//! Segment data: one basic block of the IML control-flow graph.
//!
//! A segment owns its ordered instruction list and carries the metadata the
//! later passes annotate: guest address range, condition-register flow
//! masks, enterability, and the embedded register-allocator block. Successor
//! edges and the predecessor list are maintained by
//! [`SegmentGraph`](super::graph::SegmentGraph), which is the only place
//! allowed to mutate them so the symmetric link invariant can't be broken
//! from outside.

use crate::ir::entities::{Segment, VirtReg};
use crate::ir::instruction::Inst;
use crate::regalloc::Subrange;
use cranelift_entity::packed_option::PackedOption;
use rustc_hash::FxHashMap;

/// Guest address value meaning "not associated with a guest address".
pub const INVALID_GUEST_ADDR: u32 = 0xFFFF_FFFF;

/// Per-segment register-allocator bookkeeping.
///
/// Reset at the start of every allocation pass; none of this outlives one
/// compilation of one function.
#[derive(Default)]
pub struct SegmentAllocInfo {
    /// Set when the liveness fixpoint revisited this segment because a back
    /// edge made its live-in set depend on its own live-out set.
    pub is_part_of_processed_loop: bool,
    /// The sweep number of the last fixpoint visit. Together with the sweep
    /// bound this guarantees the loop analysis terminates.
    pub last_iteration_index: u32,
    /// All subranges present in this segment, in creation order.
    pub subranges: Vec<Subrange>,
    /// The subrange open for a virtual register in this segment.
    pub per_vreg: FxHashMap<VirtReg, Subrange>,
}

impl SegmentAllocInfo {
    /// Look up the subrange active for `vreg` in this segment, if any.
    pub fn subrange_for(&self, vreg: VirtReg) -> Option<Subrange> {
        self.per_vreg.get(&vreg).copied()
    }

    pub(crate) fn reset(&mut self) {
        self.is_part_of_processed_loop = false;
        self.last_iteration_index = 0;
        self.subranges.clear();
        self.per_vreg.clear();
    }
}

/// A basic block: a straight-line run of IML instructions with at most two
/// exits.
pub struct SegmentData {
    /// Ordered IML instruction list.
    pub instructions: Vec<Inst>,
    /// Transient position in layout order. Only valid after
    /// [`SegmentGraph::renumber`](super::graph::SegmentGraph::renumber) and
    /// until the next graph mutation; not an identity.
    pub momentary_index: u32,
    pub(crate) branch_taken: PackedOption<Segment>,
    pub(crate) branch_not_taken: PackedOption<Segment>,
    pub(crate) predecessors: Vec<Segment>,
    /// The successor cannot be determined at compile time (indirect
    /// branch); the segment graph does not model its outgoing edges.
    pub successor_uncertain: bool,
    /// Loop-nest depth, supplied by the lowering stage.
    pub loop_depth: u32,
    /// Guest address of the segment start, or [`INVALID_GUEST_ADDR`].
    pub guest_address: u32,
    /// Lowest guest address covered by this segment.
    pub guest_addr_min: u32,
    /// Highest guest address covered by this segment.
    pub guest_addr_max: u32,
    /// Rough guest cycle count for this segment.
    pub cycle_count: u32,
    /// This segment can be entered from outside the recompiled code, with
    /// no registers preloaded.
    pub is_enterable: bool,
    /// Guest entry address, when `is_enterable` is set.
    pub enter_address: u32,
    /// CR bits expected to be set by a previous segment: read here before
    /// being overwritten.
    pub cr_bits_input: u32,
    /// All CR bits read in this segment.
    pub cr_bits_read: u32,
    /// CR bits written in this segment.
    pub cr_bits_written: u32,
    /// Embedded register-allocator block.
    pub alloc_info: SegmentAllocInfo,
}

impl SegmentData {
    /// Create an empty, unlinked segment.
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            momentary_index: 0,
            branch_taken: None.into(),
            branch_not_taken: None.into(),
            predecessors: Vec::new(),
            successor_uncertain: false,
            loop_depth: 0,
            guest_address: INVALID_GUEST_ADDR,
            guest_addr_min: INVALID_GUEST_ADDR,
            guest_addr_max: INVALID_GUEST_ADDR,
            cycle_count: 0,
            is_enterable: false,
            enter_address: INVALID_GUEST_ADDR,
            cr_bits_input: 0,
            cr_bits_read: 0,
            cr_bits_written: 0,
            alloc_info: SegmentAllocInfo::default(),
        }
    }

    /// The branch-taken successor, if any.
    pub fn branch_taken(&self) -> Option<Segment> {
        self.branch_taken.expand()
    }

    /// The branch-not-taken successor. This doubles as the unconditional
    /// fallthrough target for segments without a conditional branch.
    pub fn branch_not_taken(&self) -> Option<Segment> {
        self.branch_not_taken.expand()
    }

    /// Segments with an edge into this one. Back-references only; the graph
    /// arena owns all segments.
    pub fn predecessors(&self) -> &[Segment] {
        &self.predecessors
    }

    /// Whether the last instruction is a suffix (control-flow) instruction.
    pub fn has_suffix_inst(&self) -> bool {
        self.instructions.last().map_or(false, Inst::is_suffix)
    }

    /// Index of the suffix instruction, if the segment ends in one.
    pub fn suffix_inst_index(&self) -> Option<usize> {
        if self.has_suffix_inst() {
            Some(self.instructions.len() - 1)
        } else {
            None
        }
    }

    /// The last instruction of the segment, if any.
    pub fn last_inst(&self) -> Option<&Inst> {
        self.instructions.last()
    }
}

impl Default for SegmentData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::VirtReg;
    use cranelift_entity::EntityRef;

    #[test]
    fn suffix_queries() {
        let mut seg = SegmentData::new();
        assert!(!seg.has_suffix_inst());
        assert_eq!(seg.suffix_inst_index(), None);

        let r0 = VirtReg::new(0);
        seg.instructions.push(Inst::op(&[], &[r0]));
        seg.instructions.push(Inst::branch(true, &[r0]));
        assert!(seg.has_suffix_inst());
        assert_eq!(seg.suffix_inst_index(), Some(1));
        assert!(seg.last_inst().is_some_and(Inst::is_suffix));
    }
}
