//! The segment graph: arena ownership and link maintenance.
//!
//! Segments form a directed graph where every node has at most two outgoing
//! edges (branch-taken and branch-not-taken) and any number of incoming
//! edges. The predecessor lists are kept exactly inverse to the successor
//! edges; every mutation here restores that invariant before returning, so
//! a traversal can rely on it at all times. Edges are plain entity indices
//! into the arena, which makes cycles (loops) harmless: the arena owns all
//! segments and is dropped in one step when the compilation unit goes away.

use crate::ir::entities::Segment;
use crate::ir::instruction::Inst;
use crate::ir::segment::{SegmentData, INVALID_GUEST_ADDR};
use core::mem;
use core::ops::{Index, IndexMut};
use cranelift_entity::{Keys, PrimaryMap};

/// One function's worth of segments, plus the operations that maintain the
/// links between them.
pub struct SegmentGraph {
    segments: PrimaryMap<Segment, SegmentData>,
}

impl SegmentGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            segments: PrimaryMap::new(),
        }
    }

    /// Append a new, empty, unlinked segment to the arena.
    pub fn add_segment(&mut self) -> Segment {
        self.segments.push(SegmentData::new())
    }

    /// Number of segments in the graph.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Iterate over all segments in arena order.
    pub fn segments(&self) -> Keys<Segment> {
        self.segments.keys()
    }

    /// Iterate over the present successor edges of `seg`, taken edge first.
    pub fn successors(&self, seg: Segment) -> impl Iterator<Item = Segment> + '_ {
        self.segments[seg]
            .branch_taken
            .expand()
            .into_iter()
            .chain(self.segments[seg].branch_not_taken.expand())
    }

    /// Point the branch-taken edge of `src` at `dst`.
    ///
    /// Any previous taken edge is detached first; both the old and new
    /// target's predecessor lists are fixed up.
    pub fn set_link_branch_taken(&mut self, src: Segment, dst: Segment) {
        if let Some(old) = self.segments[src].branch_taken.expand() {
            self.remove_predecessor(old, src);
        }
        self.segments[src].branch_taken = dst.into();
        self.segments[dst].predecessors.push(src);
    }

    /// Point the branch-not-taken (fallthrough) edge of `src` at `dst`.
    ///
    /// This is the default continuation for segments without a conditional
    /// branch. Any previous not-taken edge is detached first.
    pub fn set_link_branch_not_taken(&mut self, src: Segment, dst: Segment) {
        if let Some(old) = self.segments[src].branch_not_taken.expand() {
            self.remove_predecessor(old, src);
        }
        self.segments[src].branch_not_taken = dst.into();
        self.segments[dst].predecessors.push(src);
    }

    /// Detach the edge from `src` to `dst` in both directions.
    ///
    /// A no-op when no such edge exists; removal may be requested
    /// speculatively during graph cleanup.
    pub fn remove_link(&mut self, src: Segment, dst: Segment) {
        if self.segments[src].branch_taken.expand() == Some(dst) {
            self.segments[src].branch_taken = None.into();
            self.remove_predecessor(dst, src);
        } else if self.segments[src].branch_not_taken.expand() == Some(dst) {
            self.segments[src].branch_not_taken = None.into();
            self.remove_predecessor(dst, src);
        }
    }

    /// Redirect every predecessor of `orig` to point at `new` instead,
    /// preserving the taken/not-taken distinction per predecessor edge.
    ///
    /// Used when a segment is split, merged, or replaced by later graph
    /// simplification passes. Afterwards `orig` has no predecessors.
    pub fn relink_input_segment(&mut self, orig: Segment, new: Segment) {
        let preds = mem::take(&mut self.segments[orig].predecessors);
        for pred in preds {
            if self.segments[pred].branch_taken.expand() == Some(orig) {
                self.segments[pred].branch_taken = new.into();
                self.segments[new].predecessors.push(pred);
            }
            if self.segments[pred].branch_not_taken.expand() == Some(orig) {
                self.segments[pred].branch_not_taken = new.into();
                self.segments[new].predecessors.push(pred);
            }
        }
    }

    /// Append an instruction to `seg`. The segment must not already end in
    /// a suffix instruction.
    pub fn append_inst(&mut self, seg: Segment, inst: Inst) {
        debug_assert!(
            !self.segments[seg].has_suffix_inst(),
            "cannot append past the suffix instruction of {}",
            seg
        );
        self.segments[seg].instructions.push(inst);
    }

    /// Mark `seg` as a valid entry point from outside the recompiled code.
    ///
    /// Enterable segments are entered with no registers preloaded, so every
    /// register live into them is reloaded from the guest register file.
    pub fn set_enterable(&mut self, seg: Segment, address: u32) {
        debug_assert!(
            !self.segments[seg].is_enterable,
            "{} is already enterable",
            seg
        );
        debug_assert_ne!(address, INVALID_GUEST_ADDR);
        self.segments[seg].is_enterable = true;
        self.segments[seg].enter_address = address;
    }

    /// Refresh `momentary_index` on every segment in arena order.
    ///
    /// Traversal passes that compare segment positions (loop detection,
    /// range ordering) call this first; the indices go stale on the next
    /// graph mutation.
    pub fn renumber(&mut self) {
        for (i, data) in self.segments.values_mut().enumerate() {
            data.momentary_index = i as u32;
        }
    }

    /// Derive the per-segment CR masks from the per-instruction masks.
    ///
    /// `cr_bits_input` is the set of bits read before being overwritten,
    /// i.e. the bits this segment expects from its predecessors.
    pub fn compute_cr_masks(&mut self) {
        for data in self.segments.values_mut() {
            let mut input = 0u32;
            let mut read = 0u32;
            let mut written = 0u32;
            for inst in &data.instructions {
                input |= inst.cr_read() & !written;
                read |= inst.cr_read();
                written |= inst.cr_written();
            }
            data.cr_bits_input = input;
            data.cr_bits_read = read;
            data.cr_bits_written = written;
        }
    }

    pub(crate) fn reset_alloc_info(&mut self) {
        for data in self.segments.values_mut() {
            data.alloc_info.reset();
        }
    }

    fn remove_predecessor(&mut self, seg: Segment, pred: Segment) {
        let preds = &mut self.segments[seg].predecessors;
        if let Some(pos) = preds.iter().position(|&p| p == pred) {
            preds.remove(pos);
        }
    }
}

impl Default for SegmentGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Segment> for SegmentGraph {
    type Output = SegmentData;

    fn index(&self, seg: Segment) -> &SegmentData {
        &self.segments[seg]
    }
}

impl IndexMut<Segment> for SegmentGraph {
    fn index_mut(&mut self, seg: Segment) -> &mut SegmentData {
        &mut self.segments[seg]
    }
}
