//! Result and error types representing the outcome of an allocation pass.

use crate::ir::{Segment, VirtReg};
use crate::regalloc::LiveRange;
use crate::verifier::VerifierErrors;
use thiserror::Error;

/// A failure of the register-allocation core.
///
/// None of these are user-facing conditions; every variant means the
/// compilation of the current function is abandoned and its arena
/// discarded, falling back to a slower execution path if one exists.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// Internal-consistency checks failed.
    ///
    /// This always represents a bug, either in the lowering that built the
    /// segment graph or in the allocator itself.
    #[error("verifier errors: {0}")]
    Verifier(#[from] VerifierErrors),

    /// A virtual register is read before any write, but the segment it
    /// enters the function through is not a valid entry point with the
    /// guest register file available.
    #[error("{vreg} is live into {segment}, which is not an enterable entry segment")]
    InputLivenessViolation {
        /// The entry segment missing its `is_enterable` mark.
        segment: Segment,
        /// The offending register.
        vreg: VirtReg,
    },

    /// The loop-liveness fixpoint failed to stabilize within its sweep
    /// bound. Guest code cannot cause this; it is an implementation bug.
    #[error("liveness fixpoint did not converge after {iterations} sweeps")]
    FixpointDiverged {
        /// Number of sweeps performed before giving up.
        iterations: u32,
    },

    /// No physical register is available for a range and the allocation
    /// policy declined to resolve it. The overlapping ranges are reported
    /// so an external spill policy can decide what to evict.
    #[error("no physical register available for {vreg} in {segment}")]
    RegisterPressure {
        /// A segment where the conflict materializes.
        segment: Segment,
        /// The register that could not be assigned.
        vreg: VirtReg,
        /// Already-assigned ranges overlapping the failing one.
        conflicts: Vec<LiveRange>,
    },
}

/// A convenient alias for a `Result` that uses `AllocError` as the error
/// type.
pub type AllocResult<T> = Result<T, AllocError>;
