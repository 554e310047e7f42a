//! The IML instruction surface consumed by the allocator.
//!
//! Instruction decoding and semantics live in the lowering stage; the core
//! only needs to know, per instruction, which virtual registers are read and
//! written, which condition-register bits flow through it, and whether it
//! terminates its segment. Everything else about an instruction is opaque
//! here.

use crate::ir::entities::VirtReg;
use smallvec::SmallVec;

/// The coarse instruction classification the allocator cares about.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum InstKind {
    /// A plain computation or memory operation.
    Normal,
    /// A segment-terminating branch. Conditional branches fall through to
    /// the segment's not-taken successor; unconditional ones only follow
    /// the taken edge.
    Branch {
        /// Whether the not-taken edge can be reached from this branch.
        conditional: bool,
    },
    /// Leaves translated code entirely (return to dispatcher, trap, ...).
    Exit,
}

/// One IML instruction, reduced to its register-usage facts.
#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    kind: InstKind,
    reads: SmallVec<[VirtReg; 4]>,
    writes: SmallVec<[VirtReg; 2]>,
    cr_read: u32,
    cr_written: u32,
}

impl Inst {
    /// Create a normal instruction reading `reads` and writing `writes`.
    pub fn op(reads: &[VirtReg], writes: &[VirtReg]) -> Self {
        Self {
            kind: InstKind::Normal,
            reads: SmallVec::from_slice(reads),
            writes: SmallVec::from_slice(writes),
            cr_read: 0,
            cr_written: 0,
        }
    }

    /// Create a segment-terminating branch. A conditional branch typically
    /// reads the registers its condition depends on.
    pub fn branch(conditional: bool, reads: &[VirtReg]) -> Self {
        Self {
            kind: InstKind::Branch { conditional },
            reads: SmallVec::from_slice(reads),
            writes: SmallVec::new(),
            cr_read: 0,
            cr_written: 0,
        }
    }

    /// Create an instruction that leaves translated code.
    pub fn exit() -> Self {
        Self {
            kind: InstKind::Exit,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            cr_read: 0,
            cr_written: 0,
        }
    }

    /// Attach condition-register bit masks to this instruction.
    pub fn with_cr(mut self, read: u32, written: u32) -> Self {
        self.cr_read = read;
        self.cr_written = written;
        self
    }

    /// The instruction classification.
    pub fn kind(&self) -> InstKind {
        self.kind
    }

    /// Virtual registers read by this instruction, in operand order.
    pub fn reads(&self) -> &[VirtReg] {
        &self.reads
    }

    /// Virtual registers written by this instruction, in operand order.
    pub fn writes(&self) -> &[VirtReg] {
        &self.writes
    }

    /// Whether this is a suffix instruction, i.e. one that must be the last
    /// instruction of its segment.
    pub fn is_suffix(&self) -> bool {
        matches!(self.kind, InstKind::Branch { .. } | InstKind::Exit)
    }

    /// Condition-register bits read by this instruction.
    pub fn cr_read(&self) -> u32 {
        self.cr_read
    }

    /// Condition-register bits written by this instruction.
    pub fn cr_written(&self) -> u32 {
        self.cr_written
    }
}
