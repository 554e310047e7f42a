//! Internal-consistency checks for the segment graph and liveness data.
//!
//! Everything checked here is an invariant the passes are supposed to
//! maintain on their own; a report from this module means a bug somewhere,
//! not a property of the guest code. The graph check is cheap enough to run
//! on every compilation, the liveness check is meant for debug builds and
//! tests.

use crate::ir::{Segment, SegmentGraph, INVALID_GUEST_ADDR};
use crate::regalloc::{Liveness, Subrange};
use core::fmt;
use cranelift_entity::SecondaryMap;

/// A single invariant violation.
#[derive(Debug, PartialEq, Eq)]
pub struct VerifierError {
    /// The segment the violation was found in, when attributable.
    pub segment: Option<Segment>,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.segment {
            Some(seg) => write!(f, "{}: {}", seg, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for VerifierError {}

/// List of verifier errors, accumulated so one run reports everything it
/// finds rather than the first problem only.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Whether no errors were collected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn report(&mut self, segment: impl Into<Option<Segment>>, message: String) {
        self.0.push(VerifierError {
            segment: segment.into(),
            message,
        });
    }

    fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifierErrors {}

/// Verify the segment graph invariants.
///
/// Checks that every predecessor list is exactly the inverse of the
/// successor edges, that enterable segments carry an entry address, and
/// that suffix instructions only appear in the final position.
pub fn verify_graph(graph: &SegmentGraph) -> Result<(), VerifierErrors> {
    let mut errors = VerifierErrors::default();

    // Rebuild the expected predecessor multiset from the edges.
    let mut expected = SecondaryMap::<Segment, Vec<Segment>>::new();
    for seg in graph.segments() {
        for succ in graph.successors(seg) {
            expected[succ].push(seg);
        }
    }
    for seg in graph.segments() {
        let mut want = expected[seg].clone();
        let mut have = graph[seg].predecessors().to_vec();
        want.sort_unstable();
        have.sort_unstable();
        if want != have {
            errors.report(
                seg,
                format!(
                    "predecessor list {:?} does not match incoming edges {:?}",
                    have, want
                ),
            );
        }
    }

    for seg in graph.segments() {
        let data = &graph[seg];
        if data.is_enterable && data.enter_address == INVALID_GUEST_ADDR {
            errors.report(seg, "enterable segment without an entry address".to_string());
        }
        let num_insts = data.instructions.len();
        for (i, inst) in data.instructions.iter().enumerate() {
            if inst.is_suffix() && i + 1 != num_insts {
                errors.report(
                    seg,
                    format!("suffix instruction at index {} is not last", i),
                );
            }
        }
    }

    errors.into_result()
}

/// Verify the liveness data against the graph.
pub fn verify_liveness(graph: &SegmentGraph, liveness: &Liveness) -> Result<(), VerifierErrors> {
    let mut errors = VerifierErrors::default();
    let points = liveness.points();

    for sub in liveness.subranges() {
        let data = liveness.subrange(sub);
        let seg = data.segment;

        if points[data.start].segment != seg || points[data.end].segment != seg {
            errors.report(seg, format!("{} references points outside its segment", sub));
            continue;
        }
        if points.cmp(data.start, data.end) == core::cmp::Ordering::Greater {
            errors.report(seg, format!("{} has start after end", sub));
        }
        match data.range.expand() {
            None => errors.report(seg, format!("{} belongs to no range", sub)),
            Some(range) => {
                if liveness.range(range).vreg != data.vreg {
                    errors.report(
                        seg,
                        format!("{} disagrees with its range about the register", sub),
                    );
                }
            }
        }
        check_continuation(graph, liveness, sub, data.branch_taken.expand(), true, &mut errors);
        check_continuation(
            graph,
            liveness,
            sub,
            data.branch_not_taken.expand(),
            false,
            &mut errors,
        );
        if data.has_store_delayed {
            if data.has_store {
                errors.report(seg, format!("{} both stores and delays its store", sub));
            }
            let conts = [data.branch_taken.expand(), data.branch_not_taken.expand()];
            if conts.iter().all(Option::is_none) {
                errors.report(seg, format!("{} delays its store with no continuation", sub));
            }
            for cont in conts.into_iter().flatten() {
                let cd = liveness.subrange(cont);
                if !cd.has_store && !cd.has_store_delayed {
                    errors.report(
                        seg,
                        format!("store delayed from {} is lost in {}", sub, cont),
                    );
                }
            }
        }
    }

    // No two subranges of the same range may overlap, and overlapping
    // subranges of different ranges must hold different registers.
    for seg in graph.segments() {
        let subs = &graph[seg].alloc_info.subranges;
        for (i, &a) in subs.iter().enumerate() {
            for &b in &subs[i + 1..] {
                if !liveness.local_overlap(a, b) {
                    continue;
                }
                let (ra, rb) = match (
                    liveness.subrange(a).range.expand(),
                    liveness.subrange(b).range.expand(),
                ) {
                    (Some(ra), Some(rb)) => (ra, rb),
                    _ => continue,
                };
                if ra == rb {
                    errors.report(seg, format!("{} and {} of the same range overlap", a, b));
                } else if let (Some(pa), Some(pb)) =
                    (liveness.range(ra).phys_reg, liveness.range(rb).phys_reg)
                {
                    if pa == pb {
                        errors.report(
                            seg,
                            format!("overlapping {} and {} share register {}", a, b, pa),
                        );
                    }
                }
            }
        }
    }

    errors.into_result()
}

fn check_continuation(
    graph: &SegmentGraph,
    liveness: &Liveness,
    sub: Subrange,
    cont: Option<Subrange>,
    taken: bool,
    errors: &mut VerifierErrors,
) {
    let cont = match cont {
        Some(c) => c,
        None => return,
    };
    let data = liveness.subrange(sub);
    let cd = liveness.subrange(cont);
    let succ = if taken {
        graph[data.segment].branch_taken()
    } else {
        graph[data.segment].branch_not_taken()
    };
    if succ != Some(cd.segment) {
        errors.report(
            data.segment,
            format!("{} continues into {} which is not the CFG successor", sub, cont),
        );
    }
    if cd.vreg != data.vreg {
        errors.report(
            data.segment,
            format!("{} continues into {} of a different register", sub, cont),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, VirtReg};
    use cranelift_entity::EntityRef;

    #[test]
    fn healthy_graph_passes() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        graph.set_link_branch_taken(a, b);
        graph.append_inst(a, Inst::branch(false, &[]));
        verify_graph(&graph).unwrap();
    }

    #[test]
    fn broken_predecessor_list_is_reported() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        graph.set_link_branch_taken(a, b);
        // Break the invariant behind the graph's back.
        graph[b].predecessors.clear();

        let errors = verify_graph(&graph).unwrap_err();
        assert_eq!(errors.0.len(), 1);
        assert_eq!(errors.0[0].segment, Some(b));
    }

    #[test]
    fn misplaced_suffix_is_reported() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        graph[a].instructions.push(Inst::exit());
        graph[a].instructions.push(Inst::op(&[], &[]));

        let errors = verify_graph(&graph).unwrap_err();
        assert!(errors.0[0].message.contains("suffix"));
    }

    #[test]
    fn healthy_liveness_passes() {
        let mut graph = SegmentGraph::new();
        let a = graph.add_segment();
        let b = graph.add_segment();
        let r1 = VirtReg::new(1);
        graph.append_inst(a, Inst::op(&[], &[r1]));
        graph.set_link_branch_not_taken(a, b);
        graph.append_inst(b, Inst::op(&[r1], &[]));
        graph.append_inst(b, Inst::exit());

        let mut liveness = Liveness::new();
        liveness.compute(&mut graph).unwrap();
        verify_liveness(&graph, &liveness).unwrap();
    }

    #[test]
    fn lost_delayed_store_is_reported() {
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

        // A's store is delayed into B; drop B's store behind the
        // analysis's back.
        let in_b = graph[b].alloc_info.subrange_for(r1).unwrap();
        liveness.subranges[in_b].has_store = false;

        let errors = verify_liveness(&graph, &liveness).unwrap_err();
        assert!(errors.0.iter().any(|e| e.message.contains("lost")));
    }
}
