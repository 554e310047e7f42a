//! Register allocator context.
//!
//! The `Context` struct owns the data structures that should be preserved
//! across invocations of the allocator. It doesn't preserve any data
//! between functions, but it avoids re-allocating the arenas for each
//! function being compiled.

use crate::ir::SegmentGraph;
use crate::regalloc::coloring::{AllocationPolicy, Coloring, GreedyPolicy};
use crate::regalloc::liverange::Liveness;
use crate::result::{AllocError, AllocResult};
use crate::verifier::{verify_graph, verify_liveness};
use log::debug;

/// Persistent memory allocations for register allocation.
pub struct Context {
    liveness: Liveness,
    coloring: Coloring,
}

impl Context {
    /// Create a new context.
    ///
    /// The context should be reused for multiple functions to avoid
    /// repeated memory allocations.
    pub fn new() -> Self {
        Self {
            liveness: Liveness::new(),
            coloring: Coloring::new(),
        }
    }

    /// Clear all data structures in this context.
    pub fn clear(&mut self) {
        self.liveness.clear();
        self.coloring.clear();
    }

    /// The liveness data computed by the last run.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Analyze `graph` and assign a physical register from a bank of
    /// `bank_size` registers to every virtual register, using `policy` to
    /// pick among the conflict-free candidates.
    ///
    /// The run is synchronous and has no suspension points: it either
    /// completes, leaving the graph annotated and the liveness data
    /// queryable through [`liveness`](Self::liveness), or it fails and the
    /// whole arena is discarded by the caller. Partial output never
    /// escapes.
    pub fn run(
        &mut self,
        graph: &mut SegmentGraph,
        bank_size: u8,
        policy: &mut dyn AllocationPolicy,
    ) -> AllocResult<()> {
        verify_graph(graph).map_err(AllocError::Verifier)?;
        graph.compute_cr_masks();
        self.liveness.compute(graph)?;
        self.coloring
            .run(graph, &mut self.liveness, bank_size, policy)?;
        if cfg!(debug_assertions) {
            verify_liveness(graph, &self.liveness).map_err(AllocError::Verifier)?;
        }
        debug!(
            "regalloc: assigned {} ranges over {} segments",
            self.liveness.ranges.len(),
            graph.num_segments()
        );
        Ok(())
    }

    /// [`run`](Self::run) with the default lowest-register-first policy.
    pub fn run_default(&mut self, graph: &mut SegmentGraph, bank_size: u8) -> AllocResult<()> {
        self.run(graph, bank_size, &mut GreedyPolicy)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, VirtReg};
    use cranelift_entity::EntityRef;

    #[test]
    fn full_pipeline_annotates_the_graph() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let (r1, r2) = (VirtReg::new(1), VirtReg::new(2));

        graph.append_inst(a, Inst::op(&[], &[r1]).with_cr(0, 0b1));
        graph.append_inst(a, Inst::op(&[], &[r2]));
        graph.set_link_branch_not_taken(a, b);
        graph.append_inst(b, Inst::op(&[r1, r2], &[r1]).with_cr(0b1, 0));
        graph.append_inst(b, Inst::exit());

        let mut ctx = Context::new();
        ctx.run_default(&mut graph, 4).unwrap();

        let liveness = ctx.liveness();
        let p1 = liveness.range(liveness.range_of(r1).unwrap()).phys_reg;
        let p2 = liveness.range(liveness.range_of(r2).unwrap()).phys_reg;
        assert!(p1.is_some() && p2.is_some());
        assert_ne!(p1, p2);

        // CR flow facts are derived on the way.
        assert_eq!(graph[a].cr_bits_written, 0b1);
        assert_eq!(graph[b].cr_bits_input, 0b1);

        // The context can be reused for the next function.
        ctx.clear();
        assert_eq!(ctx.liveness().ranges().count(), 0);
    }

    #[test]
    fn inconsistent_graph_is_rejected_up_front() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        graph.set_link_branch_taken(a, b);
        graph[b].predecessors.clear();

        let mut ctx = Context::new();
        let err = ctx.run_default(&mut graph, 4).unwrap_err();
        assert!(matches!(err, AllocError::Verifier(_)));
    }
}
