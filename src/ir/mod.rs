//! Representation of the IML segment graph.

pub mod entities;
pub mod graph;
pub mod instruction;
pub mod segment;

pub use crate::ir::entities::{PhysReg, Segment, VirtReg};
pub use crate::ir::graph::SegmentGraph;
pub use crate::ir::instruction::{Inst, InstKind};
pub use crate::ir::segment::{SegmentAllocInfo, SegmentData, INVALID_GUEST_ADDR};
