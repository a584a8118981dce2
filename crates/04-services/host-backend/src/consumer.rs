//! Host-side reader of one data ring.
//!
//! Every guest-written field is treated as hostile. The consumer keeps its
//! own copies of the read cursor and descriptor head and only ever writes
//! them back; what it reads from the guest (tail, write cursor, descriptor
//! lengths) is range checked before use.

use crate::error::{HostError, HostResult};
use data_ring::{used, DescriptorQueue, RingArea, RingEvents, RingView, RING_HEADER_LEN};
use shared_region::{HostOps, SharedRegion};
use tracing::{trace, warn};

#[derive(Debug)]
pub struct RingConsumer {
    area: RingArea,
    threshold: u32,
    read: u32,
    head: u32,
    partial: Option<Vec<u8>>,
}

impl RingConsumer {
    /// Validates a freshly prepared ring header at region offset `base`.
    pub fn attach(region: &SharedRegion, base: u32) -> HostResult<Self> {
        let data_ring = region.layout().data_ring;
        if base % 4 != 0 {
            return Err(HostError::InvalidRing("ring base misaligned"));
        }
        if !data_ring.contains(base, RING_HEADER_LEN) {
            return Err(HostError::InvalidRing("ring header outside the data ring area"));
        }

        let header = RingView::new(region, RingArea::new(base, RING_HEADER_LEN));
        let data_len = header.data_len()?;
        let len = RING_HEADER_LEN
            .checked_add(data_len)
            .ok_or(HostError::InvalidRing("ring length overflows"))?;
        let area = RingArea::new(base, len);
        if !data_ring.contains(base, len) {
            return Err(HostError::InvalidRing("ring data outside the data ring area"));
        }

        let view = RingView::new(region, area);
        if view.read_cursor()? != 0
            || view.write_cursor()? != 0
            || view.head()? != 0
            || view.tail()? != 0
        {
            return Err(HostError::InvalidRing("ring is not freshly reset"));
        }
        let threshold = view.threshold()?;
        if threshold == 0 || threshold >= data_len {
            return Err(HostError::InvalidRing("partial write threshold out of range"));
        }

        Ok(Self {
            area,
            threshold,
            read: 0,
            head: 0,
            partial: None,
        })
    }

    pub fn area(&self) -> RingArea {
        self.area
    }

    /// Whether two consumers would share bytes of the region.
    pub fn overlaps(&self, other: RingArea) -> bool {
        let ours = self.area;
        ours.base < other.base.saturating_add(other.len)
            && other.base < ours.base.saturating_add(ours.len)
    }

    /// Publishes the host's acceptance: supported operations, then the
    /// enabled bit.
    pub fn accept(&self, region: &SharedRegion, ops: HostOps) -> HostResult<()> {
        let view = RingView::new(region, self.area);
        view.store_host_ops(ops)?;
        view.store_host_events(RingEvents::ENABLED)?;
        Ok(())
    }

    /// Clears the host-owned flags so the guest stops producing.
    pub fn release(&self, region: &SharedRegion) {
        let view = RingView::new(region, self.area);
        let cleared = view
            .store_host_events(RingEvents::empty())
            .and_then(|()| view.store_host_ops(HostOps::empty()));
        if let Err(err) = cleared {
            warn!(%err, base = self.area.base, "failed to clear ring flags");
        }
    }

    /// Consumes every record the guest has made available.
    ///
    /// Complete records go to `deliver`. A partial record is accumulated
    /// locally once it is large enough that the guest must be waiting for
    /// space. Returns the number of records delivered.
    pub fn poll(
        &mut self,
        region: &SharedRegion,
        max_record_size: u32,
        mut deliver: impl FnMut(Vec<u8>),
    ) -> HostResult<usize> {
        let view = RingView::new(region, self.area);
        let queue = DescriptorQueue::new(view);
        let capacity = self.area.capacity();
        let mut delivered = 0;

        while let Some(desc) = queue.pending(self.head)? {
            if desc.len > max_record_size {
                return Err(HostError::Corrupt("record exceeds the maximum size"));
            }

            match self.partial.take() {
                Some(mut bytes) => {
                    let have = bytes.len() as u32;
                    if desc.len < have {
                        return Err(HostError::Corrupt("partial record shrank"));
                    }
                    if desc.len > have {
                        self.fetch(&view, desc.len - have, &mut bytes)?;
                    }
                    if desc.is_partial() {
                        self.partial = Some(bytes);
                        break;
                    }
                    trace!(len = bytes.len(), "partial record complete");
                    self.head = queue.pop(self.head)?;
                    delivered += 1;
                    deliver(bytes);
                }
                None if desc.is_partial() => {
                    // The guest flushes once it cannot split any further.
                    if desc.len >= capacity - 1 - self.threshold {
                        let mut bytes = Vec::with_capacity(desc.len as usize);
                        self.fetch(&view, desc.len, &mut bytes)?;
                        trace!(len = desc.len, "partial record started");
                        self.partial = Some(bytes);
                    }
                    break;
                }
                None => {
                    let mut bytes = Vec::with_capacity(desc.len as usize);
                    self.fetch(&view, desc.len, &mut bytes)?;
                    self.head = queue.pop(self.head)?;
                    if !bytes.is_empty() {
                        delivered += 1;
                        deliver(bytes);
                    }
                }
            }
        }

        Ok(delivered)
    }

    /// Moves `len` bytes at the read cursor into `into` and publishes the
    /// advanced cursor.
    fn fetch(&mut self, view: &RingView<'_>, len: u32, into: &mut Vec<u8>) -> HostResult<()> {
        if len == 0 {
            return Ok(());
        }
        let capacity = view.capacity();
        if len >= capacity {
            return Err(HostError::Corrupt("chunk larger than the ring"));
        }
        let write = view.write_cursor()?;
        if write >= capacity {
            return Err(HostError::Corrupt("write cursor out of range"));
        }
        if len > used(self.read, write, capacity) {
            return Err(HostError::Corrupt("record runs past the write cursor"));
        }

        let start = into.len();
        into.resize(start + len as usize, 0);
        view.read_data(self.read, &mut into[start..])?;
        self.read = (self.read + len) % capacity;
        view.store_read_cursor(self.read)?;
        Ok(())
    }
}
