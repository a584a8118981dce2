//! Data ring header layout and the offset-addressed view both sides use.
//!
//! ```text
//! ring base
//! +0    read_cursor:u32              host-owned
//! +4    write_cursor:u32             guest-owned
//! +8    host_events:u32              host-owned (RingEvents)
//! +12   host_supported_ops:u32       host-owned (HostOps)
//! +16   partial_write_threshold:u32
//! +20   data_len:u32                 byte ring capacity
//! +24   descriptors[64] { length:u32, flags:u32 }
//! +536  head:u32                     host-owned
//! +540  tail:u32                     guest-owned
//! +544  byte ring
//! ```

use crate::error::{RingError, RingResult};
use bitflags::bitflags;
use shared_region::{HostOps, SharedRegion, Span};
use std::sync::atomic::Ordering;

pub const READ_CURSOR_OFFSET: u32 = 0;
pub const WRITE_CURSOR_OFFSET: u32 = 4;
pub const HOST_EVENTS_OFFSET: u32 = 8;
pub const HOST_OPS_OFFSET: u32 = 12;
pub const THRESHOLD_OFFSET: u32 = 16;
pub const DATA_LEN_OFFSET: u32 = 20;
pub const DESCRIPTORS_OFFSET: u32 = 24;

/// Number of record descriptors. One slot always stays free.
pub const DESCRIPTOR_COUNT: u32 = 64;
pub const DESCRIPTOR_LEN: u32 = 8;

pub const HEAD_OFFSET: u32 = DESCRIPTORS_OFFSET + DESCRIPTOR_COUNT * DESCRIPTOR_LEN;
pub const TAIL_OFFSET: u32 = HEAD_OFFSET + 4;
/// Bytes preceding the byte ring.
pub const RING_HEADER_LEN: u32 = TAIL_OFFSET + 4;

pub const DEFAULT_PARTIAL_WRITE_THRESHOLD: u32 = 256;

const _: () = assert!(RING_HEADER_LEN == 544);

bitflags! {
    /// Flags word of a record descriptor.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u32 {
        /// The guest is still appending to the record.
        const PARTIAL = 1 << 0;
    }
}

bitflags! {
    /// Host-owned state bits of one ring.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RingEvents: u32 {
        /// The host accepted the ring and consumes it.
        const ENABLED = 1 << 0;
        /// A remote display client is attached.
        const REMOTE = 1 << 1;
        /// The remote client was reset and needs a full redraw.
        const REMOTE_RESET = 1 << 2;
        /// `host_supported_ops` holds the drawing operations the host accepts.
        const OPS_MASK = 1 << 3;
    }
}

/// Location of one ring (header plus byte ring) inside the shared region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingArea {
    /// Region offset of the ring header.
    pub base: u32,
    /// Header plus byte ring, in bytes.
    pub len: u32,
}

impl RingArea {
    pub const fn new(base: u32, len: u32) -> Self {
        Self { base, len }
    }

    /// Ring covering an entire sub-region.
    pub const fn from_span(span: Span) -> Self {
        Self::new(span.offset, span.len)
    }

    /// Byte ring capacity. Zero if the area cannot even hold the header.
    pub const fn capacity(&self) -> u32 {
        self.len.saturating_sub(RING_HEADER_LEN)
    }

    pub const fn data_offset(&self) -> u32 {
        self.base + RING_HEADER_LEN
    }

    /// Checks that the area is aligned, lies inside `data_ring`, and has room
    /// for more than one byte of data.
    pub fn validate(&self, data_ring: Span) -> RingResult<()> {
        if self.base % 4 != 0 {
            return Err(RingError::InvalidArea("ring base must be 4-byte aligned"));
        }
        if !data_ring.contains(self.base, self.len) {
            return Err(RingError::InvalidArea("ring lies outside the data ring area"));
        }
        if self.capacity() < 2 {
            return Err(RingError::InvalidArea("ring has no room for data"));
        }
        Ok(())
    }
}

/// Tunables of the guest writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Free space below which the writer flushes instead of splitting.
    pub partial_write_threshold: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            partial_write_threshold: DEFAULT_PARTIAL_WRITE_THRESHOLD,
        }
    }
}

impl RingConfig {
    pub fn validate(&self, capacity: u32) -> RingResult<()> {
        if self.partial_write_threshold == 0 {
            return Err(RingError::InvalidConfig("partial write threshold must be non-zero"));
        }
        if self.partial_write_threshold >= capacity {
            return Err(RingError::InvalidConfig(
                "partial write threshold must be below the ring capacity",
            ));
        }
        Ok(())
    }
}

/// Bytes the producer may write without catching up with the consumer.
///
/// Both cursors must be below `capacity`. One byte always stays unused so a
/// full ring never looks empty.
pub fn available(read: u32, write: u32, capacity: u32) -> u32 {
    debug_assert!(read < capacity && write < capacity);
    let diff = i64::from(read) - i64::from(write) - 1;
    diff.rem_euclid(i64::from(capacity)) as u32
}

/// Bytes written and not yet consumed.
pub fn used(read: u32, write: u32, capacity: u32) -> u32 {
    capacity - 1 - available(read, write, capacity)
}

/// One record descriptor as stored in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub len: u32,
    pub flags: RecordFlags,
}

impl Descriptor {
    pub fn is_partial(&self) -> bool {
        self.flags.contains(RecordFlags::PARTIAL)
    }
}

/// Typed accessors for one ring header and its byte ring.
///
/// Every access goes through the region's bounds checks; nothing read here
/// is trusted beyond that.
#[derive(Clone, Copy)]
pub struct RingView<'r> {
    region: &'r SharedRegion,
    area: RingArea,
}

impl<'r> RingView<'r> {
    pub fn new(region: &'r SharedRegion, area: RingArea) -> Self {
        Self { region, area }
    }

    pub fn area(&self) -> RingArea {
        self.area
    }

    pub fn capacity(&self) -> u32 {
        self.area.capacity()
    }

    fn load(&self, field: u32) -> RingResult<u32> {
        Ok(self.region.load_u32(self.area.base + field, Ordering::Acquire)?)
    }

    fn store(&self, field: u32, value: u32) -> RingResult<()> {
        Ok(self
            .region
            .store_u32(self.area.base + field, value, Ordering::Release)?)
    }

    pub fn read_cursor(&self) -> RingResult<u32> {
        self.load(READ_CURSOR_OFFSET)
    }

    pub fn store_read_cursor(&self, value: u32) -> RingResult<()> {
        self.store(READ_CURSOR_OFFSET, value)
    }

    pub fn write_cursor(&self) -> RingResult<u32> {
        self.load(WRITE_CURSOR_OFFSET)
    }

    pub fn store_write_cursor(&self, value: u32) -> RingResult<()> {
        self.store(WRITE_CURSOR_OFFSET, value)
    }

    pub fn host_events(&self) -> RingResult<RingEvents> {
        Ok(RingEvents::from_bits_retain(self.load(HOST_EVENTS_OFFSET)?))
    }

    pub fn store_host_events(&self, events: RingEvents) -> RingResult<()> {
        self.store(HOST_EVENTS_OFFSET, events.bits())
    }

    pub fn host_ops(&self) -> RingResult<HostOps> {
        Ok(HostOps::from_bits_retain(self.load(HOST_OPS_OFFSET)?))
    }

    pub fn store_host_ops(&self, ops: HostOps) -> RingResult<()> {
        self.store(HOST_OPS_OFFSET, ops.bits())
    }

    pub fn threshold(&self) -> RingResult<u32> {
        self.load(THRESHOLD_OFFSET)
    }

    pub fn store_threshold(&self, value: u32) -> RingResult<()> {
        self.store(THRESHOLD_OFFSET, value)
    }

    pub fn data_len(&self) -> RingResult<u32> {
        self.load(DATA_LEN_OFFSET)
    }

    pub fn store_data_len(&self, value: u32) -> RingResult<()> {
        self.store(DATA_LEN_OFFSET, value)
    }

    fn descriptor_offset(index: u32) -> RingResult<u32> {
        if index >= DESCRIPTOR_COUNT {
            return Err(RingError::Corrupt("descriptor index out of range"));
        }
        Ok(DESCRIPTORS_OFFSET + index * DESCRIPTOR_LEN)
    }

    pub fn descriptor(&self, index: u32) -> RingResult<Descriptor> {
        let field = Self::descriptor_offset(index)?;
        let flags = RecordFlags::from_bits_retain(self.load(field + 4)?);
        let len = self.load(field)?;
        Ok(Descriptor { len, flags })
    }

    pub fn store_descriptor_len(&self, index: u32, len: u32) -> RingResult<()> {
        self.store(Self::descriptor_offset(index)?, len)
    }

    pub fn store_descriptor_flags(&self, index: u32, flags: RecordFlags) -> RingResult<()> {
        self.store(Self::descriptor_offset(index)? + 4, flags.bits())
    }

    pub fn head(&self) -> RingResult<u32> {
        self.load(HEAD_OFFSET)
    }

    pub fn store_head(&self, value: u32) -> RingResult<()> {
        self.store(HEAD_OFFSET, value)
    }

    pub fn tail(&self) -> RingResult<u32> {
        self.load(TAIL_OFFSET)
    }

    pub fn store_tail(&self, value: u32) -> RingResult<()> {
        self.store(TAIL_OFFSET, value)
    }

    /// Copies `bytes` into the byte ring at `at`, wrapping at the physical end.
    pub fn write_data(&self, at: u32, bytes: &[u8]) -> RingResult<()> {
        let (first, rest) = self.split(at, bytes.len())?;
        let data = self.area.data_offset();
        self.region.write_bytes(data + at, &bytes[..first])?;
        if rest > 0 {
            self.region.write_bytes(data, &bytes[first..])?;
        }
        Ok(())
    }

    /// Copies bytes out of the byte ring starting at `at`, wrapping at the
    /// physical end.
    pub fn read_data(&self, at: u32, dst: &mut [u8]) -> RingResult<()> {
        let (first, rest) = self.split(at, dst.len())?;
        let data = self.area.data_offset();
        self.region.read_bytes(data + at, &mut dst[..first])?;
        if rest > 0 {
            self.region.read_bytes(data, &mut dst[first..])?;
        }
        Ok(())
    }

    fn split(&self, at: u32, len: usize) -> RingResult<(usize, usize)> {
        let capacity = self.capacity() as usize;
        if at as usize >= capacity || len > capacity {
            return Err(RingError::Corrupt("ring copy out of range"));
        }
        let first = len.min(capacity - at as usize);
        Ok((first, len - first))
    }

    /// Zeroes the whole header: cursors, flags, descriptors and indices.
    pub fn clear_header(&self) -> RingResult<()> {
        Ok(self.region.fill(self.area.base, RING_HEADER_LEN, 0)?)
    }
}
