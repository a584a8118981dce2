//! Record framing over an enabled data ring.
//!
//! A record is opened with [`RingWriter::begin_record`], filled by any number
//! of [`RingWriter::write`] calls and closed with [`RingWriter::end_record`].
//! Bytes of a record may be consumed by the host before the record is closed:
//! when free space runs short the writer publishes a partial chunk and asks
//! the host to drain it through a flush.

use crate::error::{RingError, RingResult};
use crate::layout::{available, RingEvents, RingView};
use crate::queue::DescriptorQueue;
use crate::ring::DataRing;
use control_channel::ControlChannel;
use shared_region::HostOps;
use tracing::{debug, trace, warn};

/// Exclusive producer handle over a [`DataRing`] and the channel used to
/// reach the host.
///
/// Holding the handle is the single-writer guarantee: both borrows are
/// mutable. The open record lives in the ring, so a record may span several
/// writers.
pub struct RingWriter<'a> {
    ring: &'a mut DataRing,
    channel: &'a mut ControlChannel,
}

impl<'a> RingWriter<'a> {
    pub(crate) fn new(ring: &'a mut DataRing, channel: &'a mut ControlChannel) -> Self {
        Self { ring, channel }
    }

    pub fn ring(&self) -> &DataRing {
        self.ring
    }

    /// Whether the host accepts every operation in `ops`.
    pub fn supports(&self, ops: HostOps) -> bool {
        self.ring.supports(ops)
    }

    /// Opens a new record.
    pub fn begin_record(&mut self) -> RingResult<()> {
        let view = self.ring.view(self.channel.region())?;
        if self.ring.current.is_some() {
            return Err(RingError::RecordAlreadyOpen);
        }
        if self.ring.overflow {
            return Err(RingError::Overflow);
        }
        if !view.host_events()?.contains(RingEvents::ENABLED) {
            return Err(RingError::HostDisabled);
        }

        let area = view.area();
        let queue = DescriptorQueue::new(view);
        if queue.is_full()? {
            trace!("descriptor queue full, flushing");
            self.flush();
        }

        // The flush lent the channel out; rebuild the view from a fresh borrow.
        let queue = DescriptorQueue::new(RingView::new(self.channel.region(), area));
        match queue.try_push()? {
            Some(index) => {
                trace!(index, "record opened");
                self.ring.current = Some(index);
                Ok(())
            }
            None => {
                debug!("descriptor queue still full after flush");
                Err(RingError::QueueFull)
            }
        }
    }

    /// Appends `bytes` to the open record.
    ///
    /// Chunks larger than the free space are split; the host is flushed
    /// whenever the remaining bytes do not fit. If the free space is still at
    /// or below the partial write threshold after a flush, the ring enters
    /// the sticky overflow state and every later write fails until the ring
    /// is enabled again.
    pub fn write(&mut self, bytes: &[u8]) -> RingResult<()> {
        let area = self.ring.view(self.channel.region())?.area();
        let Some(index) = self.ring.current else {
            return Err(RingError::NoOpenRecord);
        };
        if self.ring.overflow {
            return Err(RingError::Overflow);
        }

        let capacity = area.capacity();
        let threshold = self.ring.config().partial_write_threshold;
        let mut remaining = bytes;

        while !remaining.is_empty() {
            let mut free = self.free_space()?;
            if remaining.len() >= free as usize {
                self.flush();
                free = self.free_space()?;
            }

            let chunk = if remaining.len() >= free as usize {
                if free <= threshold {
                    warn!(free, threshold, pending = remaining.len(), "data ring overflow");
                    self.ring.overflow = true;
                    return Err(RingError::Overflow);
                }
                (free - threshold) as usize
            } else {
                remaining.len()
            };

            let view = RingView::new(self.channel.region(), area);
            let write = view.write_cursor()?;
            view.write_data(write, &remaining[..chunk])?;
            view.store_write_cursor((write + chunk as u32) % capacity)?;

            let len = view.descriptor(index)?.len.saturating_add(chunk as u32);
            DescriptorQueue::new(view).set_len(index, len)?;
            trace!(index, chunk, len, "record chunk");

            remaining = &remaining[chunk..];
        }

        Ok(())
    }

    /// Closes the open record; its length is final from here on.
    pub fn end_record(&mut self) -> RingResult<()> {
        let view = self.ring.view(self.channel.region())?;
        let index = self.ring.current.take().ok_or(RingError::NoOpenRecord)?;
        DescriptorQueue::new(view).complete(index)?;
        trace!(index, "record closed");
        Ok(())
    }

    /// Writes `bytes` as one complete record.
    ///
    /// On a failed write the record stays open.
    pub fn write_record(&mut self, bytes: &[u8]) -> RingResult<()> {
        self.begin_record()?;
        self.write(bytes)?;
        self.end_record()
    }

    /// Asks the host to drain the ring. Best effort.
    pub fn flush(&mut self) {
        if let Err(err) = self.channel.flush() {
            debug!(%err, "flush request failed");
        }
    }

    fn free_space(&self) -> RingResult<u32> {
        let view = self.ring.view(self.channel.region())?;
        let capacity = view.capacity();
        let read = view.read_cursor()?;
        let write = view.write_cursor()?;
        if read >= capacity || write >= capacity {
            return Err(RingError::Corrupt("ring cursor out of range"));
        }
        Ok(available(read, write, capacity))
    }
}
