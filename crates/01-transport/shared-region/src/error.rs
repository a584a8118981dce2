//! Error surface for the shared region.
//!
//! The region only fails on construction (bad configuration, allocation) and
//! on out-of-range accesses. Every offset that reaches an accessor may have
//! been read from memory the other party controls, so range errors are plain
//! values rather than panics.

use thiserror::Error;

/// Convenience result alias for fallible region operations.
pub type RegionResult<T, E = RegionError> = Result<T, E>;

/// Errors surfaced by the shared region and its layout helpers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    /// The requested layout does not fit or violates an alignment rule.
    #[error("invalid region layout: {0}")]
    InvalidLayout(&'static str),

    /// Allocation of the backing memory failed for the given size/alignment pair.
    #[error("failed to allocate shared region of {size} bytes aligned to {alignment}")]
    AllocationFailed { size: usize, alignment: usize },

    /// An access touched bytes outside of the region.
    #[error("access of {len} bytes at offset {offset:#x} exceeds region of {region_len} bytes")]
    OutOfBounds {
        offset: u32,
        len: u32,
        region_len: u32,
    },

    /// A 32-bit field access was not naturally aligned.
    #[error("field access at offset {offset:#x} is not {align}-byte aligned")]
    Misaligned { offset: u32, align: u32 },
}
