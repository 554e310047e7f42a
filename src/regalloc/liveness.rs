//! Liveness analysis over the segment graph.
//!
//! The analysis runs in phases:
//!
//! 1. **Local scan** — sweep each segment's instructions in order. The
//!    first touch of a virtual register opens a subrange at that point;
//!    every later touch appends to its touch list and extends its end.
//!    The sweep also collects each segment's `gen` set (registers read
//!    before any write) and `kill` set (registers written).
//! 2. **Dataflow fixpoint** — solve `live_in = gen ∪ (live_out − kill)`,
//!    `live_out = ⋃ live_in(successors)` with bounded iteration. Back
//!    edges make a segment's live-in depend on its own live-out; a segment
//!    whose sets change after the first sweep is flagged as part of a
//!    processed loop. The sweep count is bounded by the segment count, so
//!    guest code cannot cause non-termination; exceeding the bound is an
//!    internal error.
//! 3. **Entry check** — a register live into a segment with no
//!    predecessors must be entering through an enterable segment, where it
//!    is reloaded from the guest register file. Anywhere else the value
//!    would come from nowhere.
//! 4. **Materialization** — live-in subranges are extended back to the
//!    segment entry, live-out subranges forward to the exit, and registers
//!    live through an untouched segment get pass-through subranges.
//! 5. **Continuation linking** — for every register live across an edge,
//!    the source subrange's taken/not-taken continuation is pointed at the
//!    successor's subrange, forming the cross-segment chain of the
//!    lifetime. At join points all predecessors link to the successor's
//!    single subrange; the first predecessor in layout order wins any
//!    location decision.
//! 6. **Range assembly** — one range per virtual register, owning its
//!    subranges in layout order.
//! 7. **Dirty state** — decide `no_load`, `has_store` and
//!    `has_store_delayed` per subrange (see `mark_dirty_state`).

use crate::ir::{Segment, SegmentGraph, VirtReg};
use crate::regalloc::liverange::{LiveRange, LiveRangeData, Liveness, Subrange};
use crate::regalloc::point::{ENTRY_INDEX, EXIT_INDEX};
use crate::result::{AllocError, AllocResult};
use cranelift_entity::SecondaryMap;
use log::debug;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Scratch dataflow sets for one segment. Pass-local; dropped when the
/// analysis returns.
#[derive(Clone, Default)]
struct FlowSets {
    gen: FxHashSet<VirtReg>,
    kill: FxHashSet<VirtReg>,
    live_in: FxHashSet<VirtReg>,
    live_out: FxHashSet<VirtReg>,
}

impl Liveness {
    /// Run the liveness analysis, populating the ranges, subranges, and the
    /// per-segment allocator info blocks.
    pub fn compute(&mut self, graph: &mut SegmentGraph) -> AllocResult<()> {
        self.clear();
        graph.reset_alloc_info();
        graph.renumber();

        let segs: Vec<Segment> = graph.segments().collect();
        let mut sets = SecondaryMap::<Segment, FlowSets>::new();

        self.scan_segments(graph, &segs, &mut sets);
        let sweeps = self.solve_dataflow(graph, &segs, &mut sets)?;
        self.check_entry_liveness(graph, &segs, &sets)?;
        self.materialize(graph, &segs, &sets);
        self.link_continuations(graph, &segs, &sets);
        self.assemble_ranges(graph);
        self.mark_dirty_state(graph);

        debug!(
            "liveness: {} ranges, {} subranges over {} segments, fixpoint after {} sweeps",
            self.ranges.len(),
            self.subranges.len(),
            segs.len(),
            sweeps
        );
        Ok(())
    }

    fn scan_segments(
        &mut self,
        graph: &mut SegmentGraph,
        segs: &[Segment],
        sets: &mut SecondaryMap<Segment, FlowSets>,
    ) {
        for &seg in segs {
            let num_insts = graph[seg].instructions.len();
            for i in 0..num_insts {
                let inst = &graph[seg].instructions[i];
                let reads: SmallVec<[VirtReg; 4]> = SmallVec::from_slice(inst.reads());
                let writes: SmallVec<[VirtReg; 2]> = SmallVec::from_slice(inst.writes());
                for &vreg in &reads {
                    self.record_touch(graph, sets, seg, vreg, i as i32, true, false);
                }
                for &vreg in &writes {
                    self.record_touch(graph, sets, seg, vreg, i as i32, false, true);
                }
            }
        }
    }

    fn record_touch(
        &mut self,
        graph: &mut SegmentGraph,
        sets: &mut SecondaryMap<Segment, FlowSets>,
        seg: Segment,
        vreg: VirtReg,
        index: i32,
        is_read: bool,
        is_write: bool,
    ) {
        if is_read && !sets[seg].kill.contains(&vreg) {
            sets[seg].gen.insert(vreg);
        }
        if is_write {
            sets[seg].kill.insert(vreg);
        }
        if let Some(open) = graph[seg].alloc_info.subrange_for(vreg) {
            self.extend_subrange(open, index, is_read, is_write);
        } else {
            let subrange = self.open_subrange(seg, vreg, index, is_read, is_write);
            let info = &mut graph[seg].alloc_info;
            info.per_vreg.insert(vreg, subrange);
            info.subranges.push(subrange);
        }
    }

    fn solve_dataflow(
        &mut self,
        graph: &mut SegmentGraph,
        segs: &[Segment],
        sets: &mut SecondaryMap<Segment, FlowSets>,
    ) -> AllocResult<u32> {
        // Sweeping in reverse layout order converges in one pass for an
        // acyclic graph laid out in control-flow order; every additional
        // sweep resolves one layer of loop nesting. A live-in set can only
        // grow, so segment count + 2 sweeps is a safe bound.
        let limit = segs.len() as u32 + 2;
        let mut sweep = 0u32;
        loop {
            sweep += 1;
            if sweep > limit {
                return Err(AllocError::FixpointDiverged { iterations: sweep });
            }
            let mut changed = false;
            for &seg in segs.iter().rev() {
                let succs: SmallVec<[Segment; 2]> = graph.successors(seg).collect();
                let mut new_out = FxHashSet::default();
                for &succ in &succs {
                    for &vreg in &sets[succ].live_in {
                        new_out.insert(vreg);
                    }
                }
                let mut new_in = sets[seg].gen.clone();
                for &vreg in &new_out {
                    if !sets[seg].kill.contains(&vreg) {
                        new_in.insert(vreg);
                    }
                }
                if new_in != sets[seg].live_in || new_out != sets[seg].live_out {
                    changed = true;
                    if sweep > 1 {
                        // Only a cycle can feed a segment new facts after
                        // the first reverse sweep.
                        graph[seg].alloc_info.is_part_of_processed_loop = true;
                    }
                    sets[seg].live_in = new_in;
                    sets[seg].live_out = new_out;
                }
                graph[seg].alloc_info.last_iteration_index = sweep;
            }
            if !changed {
                return Ok(sweep);
            }
        }
    }

    fn check_entry_liveness(
        &self,
        graph: &SegmentGraph,
        segs: &[Segment],
        sets: &SecondaryMap<Segment, FlowSets>,
    ) -> AllocResult<()> {
        for &seg in segs {
            if sets[seg].live_in.is_empty() {
                continue;
            }
            if graph[seg].predecessors().is_empty() && !graph[seg].is_enterable {
                if let Some(vreg) = sets[seg].live_in.iter().copied().min() {
                    return Err(AllocError::InputLivenessViolation { segment: seg, vreg });
                }
            }
        }
        Ok(())
    }

    fn materialize(
        &mut self,
        graph: &mut SegmentGraph,
        segs: &[Segment],
        sets: &SecondaryMap<Segment, FlowSets>,
    ) {
        for &seg in segs {
            for &vreg in &sets[seg].live_in {
                if let Some(subrange) = graph[seg].alloc_info.subrange_for(vreg) {
                    let start = self.subranges[subrange].start;
                    self.points.move_to(start, ENTRY_INDEX);
                } else {
                    // Live through the segment without being touched.
                    debug_assert!(sets[seg].live_out.contains(&vreg));
                    let subrange = self.open_passthrough(seg, vreg);
                    let info = &mut graph[seg].alloc_info;
                    info.per_vreg.insert(vreg, subrange);
                    info.subranges.push(subrange);
                }
            }
            for &vreg in &sets[seg].live_out {
                if let Some(subrange) = graph[seg].alloc_info.subrange_for(vreg) {
                    let end = self.subranges[subrange].end;
                    if self.points[end].index != EXIT_INDEX {
                        self.points.move_to(end, EXIT_INDEX);
                    }
                } else {
                    debug_assert!(false, "{} live out of {} but never opened", vreg, seg);
                }
            }
        }
    }

    fn link_continuations(
        &mut self,
        graph: &SegmentGraph,
        segs: &[Segment],
        sets: &SecondaryMap<Segment, FlowSets>,
    ) {
        for &seg in segs {
            if sets[seg].live_out.is_empty() {
                continue;
            }
            let taken = graph[seg].branch_taken();
            let not_taken = graph[seg].branch_not_taken();
            for &vreg in &sets[seg].live_out {
                let src = match graph[seg].alloc_info.subrange_for(vreg) {
                    Some(s) => s,
                    None => continue,
                };
                if let Some(dst) = self.continuation_in(graph, sets, taken, vreg) {
                    self.subranges[src].branch_taken = dst.into();
                    self.subranges[dst].has_incoming = true;
                }
                if let Some(dst) = self.continuation_in(graph, sets, not_taken, vreg) {
                    self.subranges[src].branch_not_taken = dst.into();
                    self.subranges[dst].has_incoming = true;
                }
            }
        }
    }

    fn continuation_in(
        &self,
        graph: &SegmentGraph,
        sets: &SecondaryMap<Segment, FlowSets>,
        succ: Option<Segment>,
        vreg: VirtReg,
    ) -> Option<Subrange> {
        let succ = succ?;
        // A subrange in the successor continues this one only if the value
        // actually flows in; a successor that redefines the register from
        // scratch starts a fresh span.
        if !sets[succ].live_in.contains(&vreg) {
            return None;
        }
        graph[succ].alloc_info.subrange_for(vreg)
    }

    fn assemble_ranges(&mut self, graph: &SegmentGraph) {
        let subrange_ids: Vec<Subrange> = self.subranges.keys().collect();
        for subrange in subrange_ids {
            let vreg = self.subranges[subrange].vreg;
            let range = match self.vreg_range[vreg].expand() {
                Some(range) => range,
                None => {
                    let range = self.ranges.push(LiveRangeData::new(vreg));
                    self.vreg_range[vreg] = range.into();
                    range
                }
            };
            self.subranges[subrange].range = range.into();
            self.ranges[range].subranges.push(subrange);
        }
        let range_ids: Vec<LiveRange> = self.ranges.keys().collect();
        for range in range_ids {
            let mut subs = core::mem::take(&mut self.ranges[range].subranges);
            subs.sort_by_key(|&s| graph[self.subranges[s].segment].momentary_index);
            self.ranges[range].subranges = subs;
        }
    }

    /// Decide the dirty-state flags.
    ///
    /// A subrange needs no load when the value is already resident at its
    /// start: it is defined here by a write, or carried in by a linked
    /// predecessor subrange. Enterable segments are the exception; they can
    /// be entered from outside with nothing resident, so their live-in
    /// subranges always reload.
    ///
    /// A dirty subrange (one that writes the register) must flush the value
    /// before it is lost. The store is deferred to the continuation exactly
    /// when every outgoing edge of the segment carries the value forward,
    /// every continuation is itself dirty (it will store anyway, making a
    /// store here redundant), and no continuation crosses a back edge or
    /// enters an enterable segment. Everything else stores locally.
    fn mark_dirty_state(&mut self, graph: &SegmentGraph) {
        let mut locally_dirty = SecondaryMap::<Subrange, bool>::new();
        for (subrange, data) in self.subranges.iter() {
            locally_dirty[subrange] = data.is_locally_dirty();
        }

        let subrange_ids: Vec<Subrange> = self.subranges.keys().collect();
        for subrange in subrange_ids {
            let seg = self.subranges[subrange].segment;
            let starts_at_entry = self.subranges[subrange].is_live_in(&self.points);
            let no_load = if starts_at_entry {
                !graph[seg].is_enterable && self.subranges[subrange].has_incoming
            } else {
                // Not live-in, so the first touch defines the value.
                debug_assert!(self.subranges[subrange]
                    .touches
                    .first()
                    .map_or(false, |t| t.is_write));
                true
            };
            self.subranges[subrange].no_load = no_load;

            if !locally_dirty[subrange] {
                continue;
            }
            let conts: SmallVec<[Subrange; 2]> = self.subranges[subrange]
                .branch_taken
                .expand()
                .into_iter()
                .chain(self.subranges[subrange].branch_not_taken.expand())
                .collect();
            let num_edges = graph.successors(seg).count();
            let here = graph[seg].momentary_index;
            let can_delay = !conts.is_empty()
                && conts.len() == num_edges
                && conts.iter().all(|&c| {
                    let cont_seg = self.subranges[c].segment;
                    locally_dirty[c]
                        && graph[cont_seg].momentary_index > here
                        && !graph[cont_seg].is_enterable
                });
            if can_delay {
                self.subranges[subrange].has_store_delayed = true;
            } else {
                self.subranges[subrange].has_store = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Inst;
    use cranelift_entity::EntityRef;

    fn subrange_in(liveness: &Liveness, graph: &SegmentGraph, seg: Segment, vreg: VirtReg) -> Subrange {
        graph[seg]
            .alloc_info
            .subrange_for(vreg)
            .expect("no subrange for vreg in segment")
    }

    #[test]
    fn straight_line_write_read_write() {
        let mut graph = SegmentGraph::new();
        let seg = graph.add_segment();
        let r1 = VirtReg::new(1);
        graph.append_inst(seg, Inst::op(&[], &[r1]));
        graph.append_inst(seg, Inst::op(&[r1], &[]));
        graph.append_inst(seg, Inst::op(&[], &[r1]));

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        let range = liveness.range_of(r1).unwrap();
        assert_eq!(liveness.range(range).subranges.len(), 1);
        let sr = liveness.range(range).subranges[0];
        let data = liveness.subrange(sr);
        assert_eq!(liveness.points()[data.start].index, 0);
        assert_eq!(liveness.points()[data.end].index, 2);
        assert_eq!(data.touches.len(), 3);
        assert!(data.no_load, "first touch is a write, nothing to load");
        assert!(data.has_store, "no successor to delay the store into");
        assert!(!data.has_store_delayed);
    }

    #[test]
    fn diamond_links_both_paths() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let c = graph.add_segment();
        let d = graph.add_segment();
        let r1 = VirtReg::new(1);
        let r2 = VirtReg::new(2);

        graph.append_inst(a, Inst::op(&[], &[r1]));
        graph.append_inst(a, Inst::op(&[], &[r2]));
        graph.append_inst(a, Inst::branch(true, &[r2]));
        graph.set_link_branch_taken(a, b);
        graph.set_link_branch_not_taken(a, c);
        graph.set_link_branch_not_taken(b, d);
        graph.set_link_branch_not_taken(c, d);
        graph.append_inst(d, Inst::op(&[r1], &[]));
        graph.append_inst(d, Inst::exit());

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        let range = liveness.range_of(r1).unwrap();
        assert_eq!(liveness.range(range).subranges.len(), 4);

        let in_a = subrange_in(&liveness, &graph, a, r1);
        let in_b = subrange_in(&liveness, &graph, b, r1);
        let in_c = subrange_in(&liveness, &graph, c, r1);
        let in_d = subrange_in(&liveness, &graph, d, r1);

        assert_eq!(liveness.subrange(in_a).branch_taken.expand(), Some(in_b));
        assert_eq!(
            liveness.subrange(in_a).branch_not_taken.expand(),
            Some(in_c)
        );
        assert_eq!(
            liveness.subrange(in_b).branch_not_taken.expand(),
            Some(in_d)
        );
        assert_eq!(
            liveness.subrange(in_c).branch_not_taken.expand(),
            Some(in_d)
        );

        // B and C carry the value without touching it.
        assert!(liveness.subrange(in_b).touches.is_empty());
        assert!(liveness.subrange(in_c).touches.is_empty());
        // The pass-throughs aren't dirty, so A stores locally.
        assert!(liveness.subrange(in_a).has_store);
        assert!(!liveness.subrange(in_a).has_store_delayed);
        // D receives the value in a register.
        assert!(liveness.subrange(in_d).no_load);

        // r2 only lives in A.
        let r2_range = liveness.range_of(r2).unwrap();
        assert_eq!(liveness.range(r2_range).subranges.len(), 1);
    }

    #[test]
    fn self_loop_reaches_fixpoint() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let r1 = VirtReg::new(1);

        graph.append_inst(a, Inst::op(&[r1], &[]));
        graph.append_inst(a, Inst::op(&[], &[r1]));
        graph.append_inst(a, Inst::branch(true, &[r1]));
        graph.set_link_branch_taken(a, a);
        graph.set_link_branch_not_taken(a, b);
        graph.append_inst(b, Inst::exit());
        graph.set_enterable(a, 0x1000);

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        assert!(graph[a].alloc_info.is_part_of_processed_loop);
        assert!(!graph[b].alloc_info.is_part_of_processed_loop);

        let range = liveness.range_of(r1).unwrap();
        assert_eq!(liveness.range(range).subranges.len(), 1);
        let sr = liveness.range(range).subranges[0];
        let data = liveness.subrange(sr);
        // The loop-carried value continues into the next iteration.
        assert_eq!(data.branch_taken.expand(), Some(sr));
        assert_eq!(data.branch_not_taken.expand(), None);
        // Enterable segments reload; the back edge stores.
        assert!(!data.no_load);
        assert!(data.has_store);
        assert!(!data.has_store_delayed);
    }

    #[test]
    fn delayed_store_realized_downstream() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let r1 = VirtReg::new(1);

        graph.append_inst(a, Inst::op(&[], &[r1]));
        graph.set_link_branch_not_taken(a, b);
        graph.append_inst(b, Inst::op(&[r1], &[r1]));
        graph.append_inst(b, Inst::exit());

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        let in_a = subrange_in(&liveness, &graph, a, r1);
        let in_b = subrange_in(&liveness, &graph, b, r1);

        // B is dirty on its own, so A's store can be collapsed into it.
        assert!(liveness.subrange(in_a).has_store_delayed);
        assert!(!liveness.subrange(in_a).has_store);
        assert!(liveness.subrange(in_b).has_store);
        assert!(!liveness.subrange(in_b).has_store_delayed);
        assert_eq!(liveness.subrange(in_a).branch_not_taken.expand(), Some(in_b));
        // B's value arrives in a register.
        assert!(liveness.subrange(in_b).no_load);
    }

    #[test]
    fn store_not_delayed_past_dead_edge() {
        // A writes r1 and branches; only the taken path reads it. The store
        // must happen in A because the not-taken path abandons the value.
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let c = graph.add_segment();
        let (r1, r2) = (VirtReg::new(1), VirtReg::new(2));

        graph.append_inst(a, Inst::op(&[], &[r2]));
        graph.append_inst(a, Inst::op(&[], &[r1]));
        graph.append_inst(a, Inst::branch(true, &[r2]));
        graph.set_link_branch_taken(a, b);
        graph.set_link_branch_not_taken(a, c);
        graph.append_inst(b, Inst::op(&[r1], &[r1]));
        graph.append_inst(b, Inst::exit());
        graph.append_inst(c, Inst::exit());

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        let in_a = subrange_in(&liveness, &graph, a, r1);
        assert!(liveness.subrange(in_a).has_store);
        assert!(!liveness.subrange(in_a).has_store_delayed);
        assert!(graph[c].alloc_info.subrange_for(r1).is_none());
    }

    #[test]
    fn subranges_of_a_range_never_overlap() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let r1 = VirtReg::new(1);

        graph.append_inst(a, Inst::op(&[], &[r1]));
        graph.append_inst(a, Inst::op(&[r1], &[]));
        graph.set_link_branch_not_taken(a, b);
        graph.append_inst(b, Inst::op(&[r1], &[]));
        graph.append_inst(b, Inst::exit());

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        let range = liveness.range_of(r1).unwrap();
        let subs = &liveness.range(range).subranges;
        for (i, &x) in subs.iter().enumerate() {
            for &y in &subs[i + 1..] {
                assert!(!liveness.local_overlap(x, y));
            }
        }
    }

    #[test]
    fn read_at_entry_without_provider_is_fatal() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let r1 = VirtReg::new(1);
        graph.append_inst(a, Inst::op(&[r1], &[]));

        let mut liveness = Liveness::new();
        let err = liveness.compute(&mut graph).unwrap_err();
        assert_eq!(
            err,
            AllocError::InputLivenessViolation {
                segment: a,
                vreg: r1
            }
        );
    }

    #[test]
    fn enterable_entry_loads_its_inputs() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let r1 = VirtReg::new(1);
        graph.append_inst(a, Inst::op(&[r1], &[]));
        graph.set_enterable(a, 0x2000);

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();

        let sr = subrange_in(&liveness, &graph, a, r1);
        assert!(!liveness.subrange(sr).no_load);
        assert!(!liveness.subrange(sr).has_store, "read-only value is clean");
    }
}
