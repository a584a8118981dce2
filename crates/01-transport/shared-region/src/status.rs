//! Host status block.
//!
//! Written only by the host. The guest treats whatever it reads here as an
//! advisory, possibly stale hint.

use crate::{RegionResult, SharedRegion};
use bitflags::bitflags;
use std::sync::atomic::Ordering;

const EVENTS_OFFSET: u32 = 0;
const SUPPORTED_OPS_OFFSET: u32 = 4;

bitflags! {
    /// Device-wide events raised by the host.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HostEvents: u32 {
        /// Host-to-guest commands are waiting to be read.
        const COMMANDS_PENDING = 1 << 0;
        /// The host raised the device interrupt.
        const IRQ = 1 << 1;
        /// A display was connected or disconnected.
        const HOTPLUG = 1 << 2;
        /// Cursor capabilities changed.
        const CURSOR_CAPABILITIES = 1 << 3;
        /// Vertical retrace reached.
        const VSYNC = 1 << 4;
    }
}

bitflags! {
    /// Drawing operations the host is able to replay from the data ring.
    ///
    /// Unknown bits are retained so newer hosts can advertise operations an
    /// older guest does not name.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HostOps: u32 {
        const DIRTY_RECT = 1 << 0;
        const SOLID_RECT = 1 << 1;
        const SOLID_BLT = 1 << 2;
        const DST_BLT = 1 << 3;
        const SCREEN_BLT = 1 << 4;
        const PAT_BLT = 1 << 5;
        const MEM_BLT = 1 << 6;
        const CACHED_BITMAP = 1 << 7;
        const DELETED_BITMAP = 1 << 8;
        const LINE = 1 << 9;
        const BOUNDS = 1 << 10;
        const REPEAT = 1 << 11;
        const POLYLINE = 1 << 12;
        const ELLIPSE = 1 << 13;
        const SAVE_SCREEN = 1 << 14;
        const TEXT = 1 << 15;
    }
}

/// Snapshot of the host status block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostStatus {
    pub events: HostEvents,
    pub supported_ops: HostOps,
}

impl HostStatus {
    /// Reads the block. Guest side; the values may already be outdated.
    pub fn load(region: &SharedRegion) -> RegionResult<Self> {
        let base = region.layout().host_status.offset;
        let events = region.load_u32(base + EVENTS_OFFSET, Ordering::Acquire)?;
        let ops = region.load_u32(base + SUPPORTED_OPS_OFFSET, Ordering::Acquire)?;
        Ok(Self {
            events: HostEvents::from_bits_retain(events),
            supported_ops: HostOps::from_bits_retain(ops),
        })
    }

    /// Publishes the block. Host side only.
    pub fn store(&self, region: &SharedRegion) -> RegionResult<()> {
        let base = region.layout().host_status.offset;
        region.store_u32(
            base + SUPPORTED_OPS_OFFSET,
            self.supported_ops.bits(),
            Ordering::Release,
        )?;
        region.store_u32(base + EVENTS_OFFSET, self.events.bits(), Ordering::Release)
    }
}
