//! Fixed partitioning of the shared region.
//!
//! ```text
//! +--------------------+----------------------------+---------------------------+
//! | Host status (16 B) | Control heap (heap_len B)  | Data ring area (rest)     |
//! +--------------------+----------------------------+---------------------------+
//! ```
//!
//! Both parties derive the same [`RegionLayout`] from the [`RegionConfig`]
//! agreed at attach time, so sub-region bounds never travel through shared
//! memory.

use crate::{RegionError, RegionResult};

/// Size of the host status block at the start of the region.
pub const HOST_STATUS_LEN: u32 = 16;
/// Granularity of every sub-region boundary.
pub const REGION_ALIGN: u32 = 8;
/// Smallest control heap that can hold a request plus its header.
pub const MIN_CONTROL_HEAP_LEN: u32 = 64;
/// Largest region; any offset plus any in-region length fits in a `u32`.
pub const MAX_REGION_LEN: u32 = (1 << 31) - REGION_ALIGN;

/// Byte-range descriptor within the shared region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    /// Offset in bytes from the start of the region.
    pub offset: u32,
    /// Length in bytes.
    pub len: u32,
}

impl Span {
    pub const fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }

    /// One past the last byte; saturates instead of wrapping.
    pub const fn end(&self) -> u32 {
        self.offset.saturating_add(self.len)
    }

    /// Returns true when `[offset, offset + len)` lies entirely inside this span.
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        match offset.checked_add(len) {
            Some(end) => offset >= self.offset && end <= self.end(),
            None => false,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Sizes agreed out of band when the device is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionConfig {
    /// Total number of bytes mapped into both address spaces.
    pub total_len: u32,
    /// Bytes reserved for the control heap; must be a multiple of [`REGION_ALIGN`].
    pub control_heap_len: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            total_len: 256 * 1024,
            control_heap_len: 16 * 1024,
        }
    }
}

impl RegionConfig {
    pub fn validate(&self) -> RegionResult<()> {
        if self.total_len > MAX_REGION_LEN {
            return Err(RegionError::InvalidLayout("region larger than 2 GiB"));
        }
        if self.control_heap_len < MIN_CONTROL_HEAP_LEN {
            return Err(RegionError::InvalidLayout("control heap is too small"));
        }
        if self.control_heap_len % REGION_ALIGN != 0 || self.total_len % REGION_ALIGN != 0 {
            return Err(RegionError::InvalidLayout(
                "region and control heap sizes must be 8-byte multiples",
            ));
        }
        let fixed = HOST_STATUS_LEN
            .checked_add(self.control_heap_len)
            .ok_or(RegionError::InvalidLayout("control heap overflows the region"))?;
        if self.total_len <= fixed {
            return Err(RegionError::InvalidLayout("no space left for the data ring area"));
        }
        Ok(())
    }
}

/// Resolved sub-region bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionLayout {
    pub total_len: u32,
    pub host_status: Span,
    pub control_heap: Span,
    pub data_ring: Span,
}

impl RegionLayout {
    /// Validates `config` and computes the partitioning.
    pub fn new(config: RegionConfig) -> RegionResult<Self> {
        config.validate()?;
        let host_status = Span::new(0, HOST_STATUS_LEN);
        let control_heap = Span::new(host_status.end(), config.control_heap_len);
        let data_ring = Span::new(
            control_heap.end(),
            config.total_len - control_heap.end(),
        );
        Ok(Self {
            total_len: config.total_len,
            host_status,
            control_heap,
            data_ring,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_partitions_whole_region() {
        let layout = RegionLayout::new(RegionConfig::default()).expect("layout");
        assert_eq!(layout.host_status, Span::new(0, HOST_STATUS_LEN));
        assert_eq!(layout.control_heap.offset, HOST_STATUS_LEN);
        assert_eq!(layout.data_ring.offset, layout.control_heap.end());
        assert_eq!(layout.data_ring.end(), layout.total_len);
    }

    #[test]
    fn rejects_unaligned_or_oversized_heap() {
        let unaligned = RegionConfig {
            total_len: 4096,
            control_heap_len: 100,
        };
        assert!(matches!(
            RegionLayout::new(unaligned),
            Err(RegionError::InvalidLayout(_))
        ));

        let no_ring = RegionConfig {
            total_len: 4096,
            control_heap_len: 4096 - HOST_STATUS_LEN,
        };
        assert!(RegionLayout::new(no_ring).is_err());
    }

    #[test]
    fn rejects_regions_past_two_gib() {
        let largest = RegionConfig {
            total_len: MAX_REGION_LEN,
            ..RegionConfig::default()
        };
        assert!(largest.validate().is_ok());

        for total_len in [MAX_REGION_LEN + REGION_ALIGN, u32::MAX & !(REGION_ALIGN - 1)] {
            let config = RegionConfig {
                total_len,
                ..RegionConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(RegionError::InvalidLayout(_))
            ));
        }
    }

    #[test]
    fn span_contains_rejects_wrapping_ranges() {
        let span = Span::new(16, 64);
        assert!(span.contains(16, 64));
        assert!(span.contains(40, 0));
        assert!(!span.contains(15, 4));
        assert!(!span.contains(70, 16));
        assert!(!span.contains(u32::MAX - 2, 8));
    }
}
