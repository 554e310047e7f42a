//! Physical register assignment over the completed liveness data.
//!
//! Ranges are processed in order of first use; each range is assigned a
//! register not held by any already-assigned range whose subranges overlap
//! it somewhere. Which register to pick, out of the available ones, is a
//! pluggable policy; the core only guarantees the availability set it hands
//! the policy is conflict-free. This pass is purely additive over the
//! liveness data model and never mutates the segment graph.

use crate::ir::{PhysReg, Segment, SegmentGraph, VirtReg};
use crate::regalloc::liverange::{LiveRange, Liveness};
use crate::regalloc::register_set::RegisterSet;
use crate::result::{AllocError, AllocResult};
use log::trace;

/// What the policy is asked to allocate for.
pub struct RangeRequest {
    /// The range being assigned.
    pub range: LiveRange,
    /// The virtual register it describes.
    pub vreg: VirtReg,
    /// The segment containing the range's first use.
    pub first_segment: Segment,
    /// Loop-nest depth of that segment, for spill-cost weighting.
    pub loop_depth: u32,
}

/// Physical-register selection policy.
///
/// The core computes the conflict-free availability set; the policy decides
/// which member to use. Returning `None` means the policy cannot resolve
/// the request (typically because the set is empty and it has no spill
/// strategy), which surfaces as a register-pressure failure.
pub trait AllocationPolicy {
    /// Pick a register from `avail` for `req`.
    fn pick(&mut self, avail: &RegisterSet, req: &RangeRequest) -> Option<PhysReg>;
}

/// Default policy: the lowest-numbered available register.
pub struct GreedyPolicy;

impl AllocationPolicy for GreedyPolicy {
    fn pick(&mut self, avail: &RegisterSet, _req: &RangeRequest) -> Option<PhysReg> {
        avail.iter().next()
    }
}

/// The assignment pass, with reusable scratch storage.
pub struct Coloring {
    conflicts: Vec<LiveRange>,
}

impl Coloring {
    /// Create the pass.
    pub fn new() -> Self {
        Self {
            conflicts: Vec::new(),
        }
    }

    /// Clear scratch storage.
    pub fn clear(&mut self) {
        self.conflicts.clear();
    }

    /// Assign a physical register to every range.
    pub fn run(
        &mut self,
        graph: &SegmentGraph,
        liveness: &mut Liveness,
        bank_size: u8,
        policy: &mut dyn AllocationPolicy,
    ) -> AllocResult<()> {
        let mut order: Vec<LiveRange> = liveness.ranges.keys().collect();
        order.sort_by_key(|&range| {
            match liveness.ranges[range].subranges.first() {
                Some(&sub) => {
                    let data = &liveness.subranges[sub];
                    (
                        graph[data.segment].momentary_index,
                        liveness.points[data.start].index,
                    )
                }
                None => (u32::MAX, i32::MAX),
            }
        });

        for range in order {
            let first = match liveness.ranges[range].subranges.first() {
                Some(&sub) => sub,
                None => continue,
            };
            let mut avail = RegisterSet::with_bank_size(bank_size);
            self.conflicts.clear();
            let mut conflict_seg = None;

            for &sub in &liveness.ranges[range].subranges {
                let seg = liveness.subranges[sub].segment;
                for &other in &graph[seg].alloc_info.subranges {
                    if other == sub {
                        continue;
                    }
                    let other_range = match liveness.subranges[other].range.expand() {
                        Some(r) if r != range => r,
                        _ => continue,
                    };
                    if !liveness.local_overlap(sub, other) {
                        continue;
                    }
                    if let Some(reg) = liveness.ranges[other_range].phys_reg {
                        avail.remove(reg);
                        if !self.conflicts.contains(&other_range) {
                            self.conflicts.push(other_range);
                        }
                        conflict_seg = Some(seg);
                    }
                }
            }

            let vreg = liveness.ranges[range].vreg;
            let first_segment = liveness.subranges[first].segment;
            let req = RangeRequest {
                range,
                vreg,
                first_segment,
                loop_depth: graph[first_segment].loop_depth,
            };
            match policy.pick(&avail, &req) {
                Some(reg) => {
                    debug_assert!(avail.is_avail(reg), "policy picked an occupied register");
                    trace!("assigning {} to {} ({})", reg, range, vreg);
                    liveness.ranges[range].phys_reg = Some(reg);
                }
                None => {
                    return Err(AllocError::RegisterPressure {
                        segment: conflict_seg.unwrap_or(first_segment),
                        vreg,
                        conflicts: core::mem::take(&mut self.conflicts),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for Coloring {
    fn default() -> Self {
        Self::new()
    }
}
