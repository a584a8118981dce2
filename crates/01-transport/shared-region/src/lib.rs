//! Memory block shared by the guest display driver and the host device backend.
//!
//! This crate exposes the foundational pieces both sides build on:
//! * [`SharedRegion`] – bounds-checked, offset-addressed access to the block.
//! * [`RegionLayout`] / [`Span`] – the fixed partitioning into host status,
//!   control heap and data ring area.
//! * [`HostStatus`] – the host-owned status block and its capability flags.
//! * [`RegionError`] – lightweight error surface for layout and access failures.

mod error;
mod layout;
mod region;
mod status;

pub use error::{RegionError, RegionResult};
pub use layout::{
    RegionConfig, RegionLayout, Span, HOST_STATUS_LEN, MAX_REGION_LEN, MIN_CONTROL_HEAP_LEN,
    REGION_ALIGN,
};
pub use region::{SharedRegion, REGION_BASE_ALIGN};
pub use status::{HostEvents, HostOps, HostStatus};
