//! IML entity references.
//!
//! Segments and virtual registers are referenced all over the liveness data
//! model, so they are represented as typed `u32` indices into arenas rather
//! than as Rust references. The arena alone owns the underlying data; an
//! entity reference is a relation, never a lifetime. There is a separate
//! index type for each entity so we don't lose type safety.
//!
//! The entity references all implement `Display` with a short prefix
//! (`seg0`, `vr12`) matching how the passes log them.

use core::fmt;
use cranelift_entity::entity_impl;

/// An opaque reference to a segment: a basic block of IML instructions with
/// at most two successor edges.
///
/// While the order is stable, it is arbitrary and does not necessarily
/// resemble the layout order; use [`SegmentData::momentary_index`] for
/// layout-order comparisons after a renumbering sweep.
///
/// [`SegmentData::momentary_index`]: super::segment::SegmentData::momentary_index
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment(u32);
entity_impl!(Segment, "seg");

/// An opaque reference to a virtual register.
///
/// Virtual registers are compile-time-only storage slots, densely numbered
/// and unique within the function being compiled. The register allocator
/// maps each of them to a [`PhysReg`] before code emission.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtReg(u32);
entity_impl!(VirtReg, "vr");

/// A physical host register inside a single register bank.
///
/// The bank size is a parameter of the allocation pass, not a property of
/// this type; see `RegisterSet::with_bank_size`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(u8);

impl PhysReg {
    /// Create a physical register from its number within the bank.
    pub fn new(n: u8) -> Self {
        Self(n)
    }

    /// Get the register number within the bank.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Debug for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
