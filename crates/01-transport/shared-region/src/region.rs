//! Backing memory for the guest/host shared block.
//!
//! Native targets prefer anonymous `mmap` regions (page aligned). When that is
//! not possible, or on WebAssembly, we fall back to a zeroed heap allocation
//! that honors the requested alignment. The raw pointer never leaves this
//! module: callers address the region with integer offsets and every access
//! is bounds checked, because half of the fields are written by a party we do
//! not trust.

use crate::layout::{RegionConfig, RegionLayout};
use crate::{RegionError, RegionResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

/// Alignment of the region base. Page alignment keeps every fixed field
/// naturally aligned regardless of where the host maps the block.
pub const REGION_BASE_ALIGN: usize = 4096;

#[cfg(not(target_arch = "wasm32"))]
type NativeMap = memmap2::MmapMut;

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Native(#[allow(dead_code)] NativeMap),
    Owned { layout: Layout },
}

/// A fixed-size block of memory shared by guest and host.
///
/// All methods take `&self`: the two parties mutate disjoint fields
/// concurrently and coordinate through the 32-bit atomic accessors.
#[derive(Debug)]
pub struct SharedRegion {
    base: NonNull<u8>,
    len: u32,
    layout: RegionLayout,
    backing: Backing,
}

// SAFETY: the region owns its allocation and only hands out copies of its
// contents. Cross-party coordination goes through `AtomicU32` accesses; plain
// byte copies only touch ranges that the ring/heap protocols assign to a
// single writer at a time.
unsafe impl Send for SharedRegion {}
// SAFETY: see `Send`; no `&`/`&mut` references into the mapping are created.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocates a zeroed region partitioned according to `config`.
    pub fn new(config: RegionConfig) -> RegionResult<Self> {
        let layout = RegionLayout::new(config)?;
        let len = layout.total_len as usize;

        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some((base, backing)) = Self::mmap_backed(len)? {
                return Ok(Self {
                    base,
                    len: layout.total_len,
                    layout,
                    backing,
                });
            }
        }

        let (base, backing) = Self::heap_backed(len)?;
        Ok(Self {
            base,
            len: layout.total_len,
            layout,
            backing,
        })
    }

    fn heap_backed(len: usize) -> RegionResult<(NonNull<u8>, Backing)> {
        let layout = Layout::from_size_align(len, REGION_BASE_ALIGN).map_err(|_| {
            RegionError::AllocationFailed {
                size: len,
                alignment: REGION_BASE_ALIGN,
            }
        })?;

        // SAFETY: `len` is non-zero because `RegionConfig::validate` rejects empty layouts.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(RegionError::AllocationFailed {
            size: len,
            alignment: REGION_BASE_ALIGN,
        })?;
        Ok((base, Backing::Owned { layout }))
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn mmap_backed(len: usize) -> RegionResult<Option<(NonNull<u8>, Backing)>> {
        let mut map = memmap2::MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|_| RegionError::AllocationFailed {
                size: len,
                alignment: REGION_BASE_ALIGN,
            })?;

        let ptr = map.as_mut_ptr();
        if ptr as usize % REGION_BASE_ALIGN != 0 {
            return Ok(None);
        }
        let Some(base) = NonNull::new(ptr) else {
            return Ok(None);
        };

        // Anonymous mappings are zero-filled by the kernel.
        Ok(Some((base, Backing::Native(map))))
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns true when the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sub-region partitioning agreed at attach time.
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    fn check(&self, offset: u32, len: u32) -> RegionResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(RegionError::OutOfBounds {
                offset,
                len,
                region_len: self.len,
            }),
        }
    }

    fn atomic_u32(&self, offset: u32) -> RegionResult<&AtomicU32> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(RegionError::Misaligned { offset, align: 4 });
        }
        // SAFETY: the range is in bounds, 4-byte aligned (the base is page aligned)
        // and lives as long as `self`. `AtomicU32` has the same layout as `u32`.
        Ok(unsafe { &*(self.base.as_ptr().add(offset as usize) as *const AtomicU32) })
    }

    /// Loads a 32-bit field with the given ordering.
    pub fn load_u32(&self, offset: u32, order: Ordering) -> RegionResult<u32> {
        Ok(self.atomic_u32(offset)?.load(order))
    }

    /// Stores a 32-bit field with the given ordering.
    pub fn store_u32(&self, offset: u32, value: u32, order: Ordering) -> RegionResult<()> {
        self.atomic_u32(offset)?.store(value, order);
        Ok(())
    }

    pub fn load_i32(&self, offset: u32, order: Ordering) -> RegionResult<i32> {
        self.load_u32(offset, order).map(|v| v as i32)
    }

    pub fn store_i32(&self, offset: u32, value: i32, order: Ordering) -> RegionResult<()> {
        self.store_u32(offset, value as u32, order)
    }

    /// Reads a little-endian `u16`. Not atomic; used for header fields written
    /// before the buffer is handed over.
    pub fn read_u16(&self, offset: u32) -> RegionResult<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn write_u16(&self, offset: u32, value: u16) -> RegionResult<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Copies `dst.len()` bytes starting at `offset` out of the region.
    pub fn read_bytes(&self, offset: u32, dst: &mut [u8]) -> RegionResult<()> {
        let len = u32::try_from(dst.len()).map_err(|_| RegionError::OutOfBounds {
            offset,
            len: u32::MAX,
            region_len: self.len,
        })?;
        self.check(offset, len)?;
        // SAFETY: the source range is in bounds and `dst` is a distinct Rust allocation.
        unsafe {
            ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset as usize),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        Ok(())
    }

    /// Copies `src` into the region at `offset`.
    pub fn write_bytes(&self, offset: u32, src: &[u8]) -> RegionResult<()> {
        let len = u32::try_from(src.len()).map_err(|_| RegionError::OutOfBounds {
            offset,
            len: u32::MAX,
            region_len: self.len,
        })?;
        self.check(offset, len)?;
        // SAFETY: the destination range is in bounds and `src` cannot alias the
        // mapping because no references into it are ever handed out.
        unsafe {
            ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.base.as_ptr().add(offset as usize),
                src.len(),
            );
        }
        Ok(())
    }

    /// Sets `len` bytes starting at `offset` to `byte`.
    pub fn fill(&self, offset: u32, len: u32, byte: u8) -> RegionResult<()> {
        self.check(offset, len)?;
        // SAFETY: the range was bounds checked above.
        unsafe {
            ptr::write_bytes(self.base.as_ptr().add(offset as usize), byte, len as usize);
        }
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Owned { layout } = &self.backing {
            // SAFETY: `base` was returned by `alloc_zeroed` with this exact layout.
            unsafe {
                dealloc(self.base.as_ptr(), *layout);
            }
        }
    }
}
