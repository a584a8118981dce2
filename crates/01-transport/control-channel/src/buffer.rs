//! Per-call control buffer handle.

use crate::channel::ControlChannel;
use crate::error::{ChannelError, ChannelResult};
use crate::wire::{load_result, BufferHeader, ResultCode, HEADER_LEN};
use shared_region::{SharedRegion, Span};
use tracing::trace;

/// One allocated control buffer, valid for a single round trip.
///
/// The handle borrows the channel mutably, so at most one buffer is in
/// flight per channel. Dropping it returns the block to the control heap on
/// every path, including early returns after a failed payload access.
pub struct ControlBuffer<'a> {
    channel: &'a mut ControlChannel,
    block: Span,
    payload_len: u32,
}

impl<'a> ControlBuffer<'a> {
    pub(crate) fn new(channel: &'a mut ControlChannel, block: Span, payload_len: u32) -> Self {
        Self {
            channel,
            block,
            payload_len,
        }
    }

    /// Region offset of the buffer header. This is what the doorbell carries.
    pub fn offset(&self) -> u32 {
        self.block.offset
    }

    /// Region offset of the first payload byte.
    pub fn payload_offset(&self) -> u32 {
        self.block.offset + HEADER_LEN
    }

    pub fn payload_len(&self) -> u32 {
        self.payload_len
    }

    pub fn region(&self) -> &SharedRegion {
        self.channel.region()
    }

    /// Copies `bytes` into the payload starting at `at`.
    pub fn write_payload(&mut self, at: u32, bytes: &[u8]) -> ChannelResult<()> {
        let offset = self.payload_range(at, bytes.len())?;
        self.region().write_bytes(offset, bytes)?;
        Ok(())
    }

    /// Copies payload bytes starting at `at` into `dst`.
    pub fn read_payload(&self, at: u32, dst: &mut [u8]) -> ChannelResult<()> {
        let offset = self.payload_range(at, dst.len())?;
        self.region().read_bytes(offset, dst)?;
        Ok(())
    }

    /// Reads the header back, including whatever the host wrote.
    pub fn header(&self) -> ChannelResult<BufferHeader> {
        Ok(BufferHeader::read(self.region(), self.offset())?)
    }

    /// Hands the buffer to the host and waits for it to finish.
    ///
    /// Returns the header-level result code. Command failures are values, not
    /// errors.
    pub fn submit(&mut self) -> ChannelResult<ResultCode> {
        let offset = self.offset();
        trace!(offset, payload_len = self.payload_len, "control submit");
        self.channel.doorbell().submit(offset);
        self.result()
    }

    /// Header-level result code as currently stored.
    pub fn result(&self) -> ChannelResult<ResultCode> {
        Ok(load_result(self.region(), self.offset())?)
    }

    fn payload_range(&self, at: u32, len: usize) -> ChannelResult<u32> {
        let fits = u32::try_from(len)
            .ok()
            .and_then(|len| at.checked_add(len))
            .is_some_and(|end| end <= self.payload_len);
        if !fits {
            return Err(ChannelError::PayloadRange {
                at,
                len,
                payload_len: self.payload_len,
            });
        }
        Ok(self.payload_offset() + at)
    }
}

impl Drop for ControlBuffer<'_> {
    fn drop(&mut self) {
        self.channel.release(self.block);
    }
}
