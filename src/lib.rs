//! Liveness analysis and register allocation for an IML recompiler core.
//!
//! Guest code is lowered into a chain of [`ir::SegmentData`] basic blocks
//! forming a directed graph; branches create edges and loops create back
//! edges. This crate takes that graph, computes where every virtual
//! register is live, and maps the unbounded virtual registers onto a
//! bounded bank of physical host registers, annotating the graph with the
//! load/store placement facts the emission stage needs.
//!
//! The liveness model follows the lifetime of one virtual register as a
//! [`regalloc::LiveRange`] made of per-segment
//! [`regalloc::Subrange`]s, chained across control-flow edges.
//! Loop-carried liveness — a value flowing around a back edge into its own
//! segment — is resolved by a bounded dataflow fixpoint, so guest code can
//! never make the analysis diverge.
//!
//! All graph nodes and liveness objects live in arenas and reference each
//! other through typed indices; one compilation unit is one arena, and
//! discarding a compilation frees everything at once. A single compilation
//! is strictly single-threaded, but independent compilations can run
//! concurrently since they share no state.
//!
//! The usual entry point is [`regalloc::Context`]:
//!
//! ```
//! use iml_regalloc::ir::{Inst, SegmentGraph, VirtReg};
//! use iml_regalloc::regalloc::Context;
//! use cranelift_entity::EntityRef;
//!
//! let mut graph = SegmentGraph::new();
//! let seg = graph.add_segment();
//! let r0 = VirtReg::new(0);
//! graph.append_inst(seg, Inst::op(&[], &[r0]));
//! graph.append_inst(seg, Inst::op(&[r0], &[]));
//!
//! let mut ctx = Context::new();
//! ctx.run_default(&mut graph, 8).expect("allocation");
//! let liveness = ctx.liveness();
//! assert!(liveness.range_of(r0).is_some());
//! ```

#![deny(missing_docs)]

pub mod ir;
pub mod regalloc;
pub mod result;
pub mod verifier;

pub use crate::result::{AllocError, AllocResult};
