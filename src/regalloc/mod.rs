//! Liveness analysis and register allocation passes.

pub mod coloring;
pub mod context;
pub mod liverange;
pub mod liveness;
pub mod point;
pub mod register_set;

pub use self::coloring::{AllocationPolicy, Coloring, GreedyPolicy, RangeRequest};
pub use self::context::Context;
pub use self::liverange::{
    LiveRange, LiveRangeData, Liveness, Subrange, SubrangeData, TouchPoint,
};
pub use self::point::{Point, PointData, PointPool, ENTRY_INDEX, EXIT_INDEX};
pub use self::register_set::{RegSetIter, RegisterSet};
