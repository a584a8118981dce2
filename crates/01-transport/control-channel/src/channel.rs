use crate::buffer::ControlBuffer;
use crate::error::{ChannelError, ChannelResult};
use crate::heap::ControlHeap;
use crate::wire::{
    CapsPayload, Command, Conf32Payload, GuestCaps, ResultCode, DISPLAY_CHANNEL, HEADER_LEN,
};
use crate::BufferHeader;
use shared_region::{SharedRegion, Span};
use std::sync::Arc;
use tracing::{debug, trace};

/// Notify-and-wait primitive transferring control to the host.
///
/// `submit` must not return before the host has processed the buffer at
/// `offset` and written its result fields.
pub trait Doorbell: Send + Sync {
    fn submit(&self, offset: u32);
}

/// Result code paired with the value the host returned alongside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply<T> {
    pub result: ResultCode,
    pub value: T,
}

impl<T> Reply<T> {
    pub fn into_result(self) -> Result<T, ResultCode> {
        if self.result.is_success() {
            Ok(self.value)
        } else {
            Err(self.result)
        }
    }
}

/// Guest end of the synchronous request/response protocol.
pub struct ControlChannel {
    region: Arc<SharedRegion>,
    heap: ControlHeap,
    doorbell: Arc<dyn Doorbell>,
}

impl ControlChannel {
    /// Creates a channel over the control heap of `region`.
    pub fn new(region: Arc<SharedRegion>, doorbell: Arc<dyn Doorbell>) -> Self {
        let heap = ControlHeap::new(region.layout().control_heap);
        Self {
            region,
            heap,
            doorbell,
        }
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Shared handle to the region, for components living next to the channel.
    pub fn region_handle(&self) -> Arc<SharedRegion> {
        Arc::clone(&self.region)
    }

    pub fn heap(&self) -> &ControlHeap {
        &self.heap
    }

    pub(crate) fn doorbell(&self) -> &dyn Doorbell {
        &*self.doorbell
    }

    pub(crate) fn release(&mut self, block: Span) {
        self.heap.free(block);
    }

    /// Allocates a buffer with a zeroed payload of `payload_len` bytes and a
    /// stamped header.
    ///
    /// The result field starts out as `NOT_IMPLEMENTED`, so a host that never
    /// touches the buffer reads as a failure.
    pub fn alloc(
        &mut self,
        payload_len: usize,
        channel: u16,
        command: impl Into<u16>,
    ) -> ChannelResult<ControlBuffer<'_>> {
        let payload_len = u32::try_from(payload_len)
            .ok()
            .filter(|len| len.checked_add(HEADER_LEN).is_some())
            .ok_or(ChannelError::PayloadTooLarge { len: payload_len })?;
        let requested = HEADER_LEN + payload_len;

        let Some(block) = self.heap.alloc(requested) else {
            let largest_free = self.heap.largest_free();
            debug!(requested, largest_free, "control heap exhausted");
            return Err(ChannelError::NoMemory {
                requested,
                largest_free,
            });
        };

        let header = BufferHeader {
            channel,
            command: command.into(),
            payload_size: payload_len,
            result: ResultCode::NOT_IMPLEMENTED,
        };
        let stamped = header.write(&self.region, block.offset).and_then(|()| {
            self.region
                .fill(block.offset + HEADER_LEN, block.len - HEADER_LEN, 0)
        });
        if let Err(err) = stamped {
            self.heap.free(block);
            return Err(err.into());
        }

        Ok(ControlBuffer::new(self, block, payload_len))
    }

    /// Display-channel shorthand for [`ControlChannel::alloc`].
    pub fn alloc_display(
        &mut self,
        payload_len: usize,
        command: Command,
    ) -> ChannelResult<ControlBuffer<'_>> {
        self.alloc(payload_len, DISPLAY_CHANNEL, command)
    }

    /// Asks the host to run its consumption pass now.
    ///
    /// Speculative and idempotent: the outcome only tells the caller whether
    /// the host understood the request.
    pub fn flush(&mut self) -> ChannelResult<ResultCode> {
        let mut buffer = self.alloc_display(0, Command::Flush)?;
        let result = buffer.submit()?;
        trace!(%result, "flush");
        Ok(result)
    }

    /// Reads a 32-bit host configuration value.
    pub fn query_conf32(&mut self, index: impl Into<u32>) -> ChannelResult<Reply<u32>> {
        let index = index.into();
        let mut buffer = self.alloc_display(Conf32Payload::LEN as usize, Command::QueryConf32)?;
        let payload = buffer.payload_offset();
        Conf32Payload { index, value: 0 }.write(buffer.region(), payload)?;

        let result = buffer.submit()?;
        let reply = Conf32Payload::read(buffer.region(), payload)?;
        debug!(index, value = reply.value, %result, "query conf32");
        Ok(Reply {
            result,
            value: reply.value,
        })
    }

    /// Writes a 32-bit host configuration value.
    pub fn set_conf32(&mut self, index: impl Into<u32>, value: u32) -> ChannelResult<ResultCode> {
        let index = index.into();
        let mut buffer = self.alloc_display(Conf32Payload::LEN as usize, Command::SetConf32)?;
        let payload = buffer.payload_offset();
        Conf32Payload { index, value }.write(buffer.region(), payload)?;

        let result = buffer.submit()?;
        debug!(index, value, %result, "set conf32");
        Ok(result)
    }

    /// Reports the guest's capability flags to the host.
    ///
    /// Returns the payload-level result when the host accepted the command.
    pub fn report_caps(&mut self, caps: GuestCaps) -> ChannelResult<ResultCode> {
        let mut buffer = self.alloc_display(CapsPayload::LEN as usize, Command::InfoCaps)?;
        let payload = buffer.payload_offset();
        CapsPayload {
            caps,
            result: ResultCode::NOT_IMPLEMENTED,
        }
        .write(buffer.region(), payload)?;

        let result = buffer.submit()?;
        if !result.is_success() {
            return Ok(result);
        }
        let reply = CapsPayload::read(buffer.region(), payload)?;
        debug!(caps = caps.bits(), result = %reply.result, "report caps");
        Ok(reply.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{store_result, ConfIndex};
    use parking_lot::Mutex;
    use shared_region::RegionConfig;

    /// Answers display-channel commands the way a minimal host would.
    struct EchoHost {
        region: Arc<SharedRegion>,
        seen: Mutex<Vec<BufferHeader>>,
    }

    impl Doorbell for EchoHost {
        fn submit(&self, offset: u32) {
            let header = BufferHeader::read(&self.region, offset).unwrap();
            self.seen.lock().push(header);
            let payload = offset + HEADER_LEN;
            let result = match Command::from_u16(header.command) {
                Some(Command::QueryConf32) => {
                    let mut conf = Conf32Payload::read(&self.region, payload).unwrap();
                    conf.value = 0x40 + conf.index;
                    conf.write(&self.region, payload).unwrap();
                    ResultCode::OK
                }
                Some(Command::InfoCaps) => {
                    let mut caps = CapsPayload::read(&self.region, payload).unwrap();
                    caps.result = ResultCode::OK;
                    caps.write(&self.region, payload).unwrap();
                    ResultCode::OK
                }
                Some(Command::Flush) => ResultCode::OK,
                _ => ResultCode::NOT_IMPLEMENTED,
            };
            store_result(&self.region, offset, result).unwrap();
        }
    }

    fn setup(config: RegionConfig) -> (ControlChannel, Arc<EchoHost>) {
        let region = Arc::new(SharedRegion::new(config).unwrap());
        let host = Arc::new(EchoHost {
            region: Arc::clone(&region),
            seen: Mutex::new(Vec::new()),
        });
        (ControlChannel::new(region, host.clone()), host)
    }

    #[test]
    fn alloc_stamps_header_and_zeroes_payload() {
        let (mut channel, _) = setup(RegionConfig::default());
        let region = channel.region_handle();

        // Leave garbage where the next buffer will land.
        let heap = region.layout().control_heap;
        region.fill(heap.offset, 64, 0xAA).unwrap();

        let buffer = channel.alloc(20, DISPLAY_CHANNEL, Command::Enable).unwrap();
        let header = buffer.header().unwrap();
        assert_eq!(header.channel, DISPLAY_CHANNEL);
        assert_eq!(header.command, u16::from(Command::Enable));
        assert_eq!(header.payload_size, 20);
        assert_eq!(header.result, ResultCode::NOT_IMPLEMENTED);

        let mut payload = [0xFFu8; 20];
        buffer.read_payload(0, &mut payload).unwrap();
        assert_eq!(payload, [0u8; 20]);
    }

    #[test]
    fn buffers_are_freed_on_every_path() {
        let (mut channel, _) = setup(RegionConfig::default());

        channel.flush().unwrap();
        assert_eq!(channel.heap().live_blocks(), 0);

        {
            let mut buffer = channel.alloc_display(4, Command::SetConf32).unwrap();
            let err = buffer.write_payload(2, &[1, 2, 3]).unwrap_err();
            assert!(matches!(err, ChannelError::PayloadRange { at: 2, len: 3, .. }));
        }
        assert_eq!(channel.heap().live_blocks(), 0);
        assert_eq!(channel.heap().largest_free(), channel.heap().span().len);
    }

    #[test]
    fn exhausted_heap_reports_no_memory() {
        let config = RegionConfig {
            total_len: 64 * 1024,
            control_heap_len: 64,
        };
        let (mut channel, host) = setup(config);

        let err = channel.alloc_display(64, Command::SetConf32).err().unwrap();
        assert!(matches!(
            err,
            ChannelError::NoMemory {
                requested: 76,
                largest_free: 64
            }
        ));
        assert!(host.seen.lock().is_empty());

        let err = channel.alloc_display(usize::MAX, Command::Flush).err().unwrap();
        assert!(matches!(err, ChannelError::PayloadTooLarge { .. }));
    }

    #[test]
    fn typed_requests_round_trip_through_the_host() {
        let (mut channel, host) = setup(RegionConfig::default());

        let reply = channel.query_conf32(ConfIndex::HostHeapSize).unwrap();
        assert_eq!(reply.into_result(), Ok(0x41));

        assert_eq!(
            channel.report_caps(GuestCaps::IRQ | GuestCaps::MODE_HINTS).unwrap(),
            ResultCode::OK
        );
        assert_eq!(
            channel.set_conf32(ConfIndex::MonitorCount, 1).unwrap(),
            ResultCode::NOT_IMPLEMENTED
        );

        let commands: Vec<u16> = host.seen.lock().iter().map(|h| h.command).collect();
        assert_eq!(commands, vec![1, 12, 2]);
        assert_eq!(channel.heap().live_blocks(), 0);
    }

    #[test]
    fn unknown_commands_are_ordinary_results() {
        let (mut channel, _) = setup(RegionConfig::default());
        let mut buffer = channel.alloc(0, DISPLAY_CHANNEL, 0x7777u16).unwrap();
        assert_eq!(buffer.submit().unwrap(), ResultCode::NOT_IMPLEMENTED);
    }
}
