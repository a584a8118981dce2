//! Guest-local allocator for the control heap.
//!
//! Request buffers are short-lived: one allocation per round trip, released
//! as soon as the host has answered. The bookkeeping never lives in shared
//! memory, so the host cannot corrupt the allocator; it only ever sees the
//! blocks handed to it through the doorbell.

use shared_region::Span;
use std::collections::BTreeMap;

/// Granularity of every block carved from the heap.
pub const BLOCK_ALIGN: u32 = 8;

/// First-fit allocator over a [`Span`] of the shared region.
///
/// Free extents are kept sorted by offset and merged with their neighbours on
/// release, so a heap whose buffers have all been returned is a single extent
/// again.
#[derive(Debug)]
pub struct ControlHeap {
    span: Span,
    free: BTreeMap<u32, u32>,
    live: BTreeMap<u32, u32>,
}

impl ControlHeap {
    /// Creates an empty heap managing `span`. The span must be block aligned.
    pub fn new(span: Span) -> Self {
        debug_assert!(span.offset % BLOCK_ALIGN == 0 && span.len % BLOCK_ALIGN == 0);
        let mut free = BTreeMap::new();
        if !span.is_empty() {
            free.insert(span.offset, span.len);
        }
        Self {
            span,
            free,
            live: BTreeMap::new(),
        }
    }

    /// Bounds of the managed sub-region.
    pub fn span(&self) -> Span {
        self.span
    }

    /// Carves a block of at least `len` bytes.
    ///
    /// Returns `None` when no free extent is large enough.
    pub fn alloc(&mut self, len: u32) -> Option<Span> {
        let need = align_up(len.max(1))?;
        let (&offset, &extent) = self.free.iter().find(|&(_, &extent)| extent >= need)?;

        self.free.remove(&offset);
        if extent > need {
            self.free.insert(offset + need, extent - need);
        }
        self.live.insert(offset, need);
        Some(Span::new(offset, need))
    }

    /// Returns a block obtained from [`ControlHeap::alloc`].
    pub fn free(&mut self, block: Span) {
        match self.live.remove(&block.offset) {
            Some(len) if len == block.len => {}
            other => {
                debug_assert!(false, "freeing unknown block {block:?} (live entry {other:?})");
                return;
            }
        }

        let mut offset = block.offset;
        let mut len = block.len;

        if let Some((&prev_offset, &prev_len)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_len == offset {
                self.free.remove(&prev_offset);
                offset = prev_offset;
                len += prev_len;
            }
        }
        if let Some(&next_len) = self.free.get(&(offset + len)) {
            self.free.remove(&(offset + len));
            len += next_len;
        }

        self.free.insert(offset, len);
    }

    /// Total number of free bytes, possibly fragmented.
    pub fn free_bytes(&self) -> u32 {
        self.free.values().sum()
    }

    /// Size of the largest block that can currently be allocated.
    pub fn largest_free(&self) -> u32 {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Number of blocks handed out and not yet returned.
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }
}

fn align_up(len: u32) -> Option<u32> {
    len.checked_add(BLOCK_ALIGN - 1).map(|v| v & !(BLOCK_ALIGN - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    const HEAP_OFFSET: u32 = 16;
    const HEAP_LEN: u32 = 1024;

    fn heap() -> ControlHeap {
        ControlHeap::new(Span::new(HEAP_OFFSET, HEAP_LEN))
    }

    fn overlaps(a: Span, b: Span) -> bool {
        a.offset < b.end() && b.offset < a.end()
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut heap = heap();
        let a = heap.alloc(12).expect("alloc a");
        let b = heap.alloc(1).expect("alloc b");
        let c = heap.alloc(100).expect("alloc c");

        for block in [a, b, c] {
            assert_eq!(block.offset % BLOCK_ALIGN, 0);
            assert_eq!(block.len % BLOCK_ALIGN, 0);
            assert!(heap.span().contains(block.offset, block.len));
        }
        assert_eq!(a.len, 16);
        assert_eq!(b.len, 8);
        assert!(!overlaps(a, b) && !overlaps(b, c) && !overlaps(a, c));
        assert_eq!(heap.live_blocks(), 3);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut heap = heap();
        let whole = heap.alloc(HEAP_LEN).expect("whole heap");
        assert!(heap.alloc(8).is_none());
        heap.free(whole);
        assert!(heap.alloc(HEAP_LEN + 1).is_none());
        assert!(heap.alloc(u32::MAX).is_none());
    }

    /// Releasing blocks in any order must coalesce back into one extent.
    #[test]
    fn free_coalesces_neighbours() {
        let mut heap = heap();
        let blocks: Vec<Span> = (0..8).map(|_| heap.alloc(64).unwrap()).collect();
        assert_eq!(heap.free_bytes(), HEAP_LEN - 8 * 64);

        for idx in [1, 3, 5, 7, 0, 2, 6, 4] {
            heap.free(blocks[idx]);
        }

        assert_eq!(heap.free_bytes(), HEAP_LEN);
        assert_eq!(heap.largest_free(), HEAP_LEN);
        assert_eq!(heap.live_blocks(), 0);
    }

    /// Randomised churn: live blocks never overlap and accounting stays exact.
    #[test]
    fn random_churn_keeps_invariants() {
        let mut heap = heap();
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let mut live: Vec<Span> = Vec::new();

        for _ in 0..5_000 {
            if live.is_empty() || rng.gen_bool(0.55) {
                if let Some(block) = heap.alloc(rng.gen_range(1..200)) {
                    assert!(live.iter().all(|other| !overlaps(*other, block)));
                    live.push(block);
                }
            } else {
                let idx = rng.gen_range(0..live.len());
                heap.free(live.swap_remove(idx));
            }

            let used: u32 = live.iter().map(|b| b.len).sum();
            assert_eq!(heap.free_bytes() + used, HEAP_LEN);
        }

        for block in live.drain(..) {
            heap.free(block);
        }
        assert_eq!(heap.largest_free(), HEAP_LEN);
    }
}
