//! Byte-exact layouts of control buffers and their payloads.
//!
//! ```text
//! Control buffer:
//!   +0  magic_channel:u16   +2 command:u16   +4 payload_size:u32   +8 result:i32
//!   +12 payload[payload_size]
//!
//! Enable payload:   flags:u32, ring_base_offset:u32, screen_index:i32, result:i32
//! Conf32 payload:   index:u32, value:u32
//! Caps payload:     caps:u32, result:i32
//! ```
//!
//! All integers are little-endian. Fields never move between versions; new
//! commands get new ids instead.

use bitflags::bitflags;
use shared_region::{RegionResult, SharedRegion};
use std::fmt;
use std::sync::atomic::Ordering;

/// Size of the control buffer header preceding every payload.
pub const HEADER_LEN: u32 = 12;

const CHANNEL_OFFSET: u32 = 0;
const COMMAND_OFFSET: u32 = 2;
const PAYLOAD_SIZE_OFFSET: u32 = 4;
const RESULT_OFFSET: u32 = 8;

/// Channel id of the display protocol.
pub const DISPLAY_CHANNEL: u16 = 0x0002;

/// Commands understood on [`DISPLAY_CHANNEL`].
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    QueryConf32 = 1,
    SetConf32 = 2,
    Flush = 5,
    Enable = 7,
    InfoCaps = 12,
}

impl Command {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Command::QueryConf32),
            2 => Some(Command::SetConf32),
            5 => Some(Command::Flush),
            7 => Some(Command::Enable),
            12 => Some(Command::InfoCaps),
            _ => None,
        }
    }
}

impl From<Command> for u16 {
    fn from(command: Command) -> Self {
        command as u16
    }
}

/// Status code written by the host. Negative values are failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const OK: Self = Self(0);
    pub const INVALID_PARAMETER: Self = Self(-2);
    pub const NOT_IMPLEMENTED: Self = Self(-12);
    pub const NOT_SUPPORTED: Self = Self(-37);
    pub const OUT_OF_RANGE: Self = Self(-54);

    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            ResultCode::OK => "ok",
            ResultCode::INVALID_PARAMETER => "invalid parameter",
            ResultCode::NOT_IMPLEMENTED => "not implemented",
            ResultCode::NOT_SUPPORTED => "not supported",
            ResultCode::OUT_OF_RANGE => "out of range",
            _ => return write!(f, "status {}", self.0),
        };
        write!(f, "{name} ({})", self.0)
    }
}

/// Decoded control buffer header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHeader {
    pub channel: u16,
    pub command: u16,
    pub payload_size: u32,
    pub result: ResultCode,
}

impl BufferHeader {
    pub fn read(region: &SharedRegion, offset: u32) -> RegionResult<Self> {
        Ok(Self {
            channel: region.read_u16(offset + CHANNEL_OFFSET)?,
            command: region.read_u16(offset + COMMAND_OFFSET)?,
            payload_size: region.load_u32(offset + PAYLOAD_SIZE_OFFSET, Ordering::Acquire)?,
            result: ResultCode(region.load_i32(offset + RESULT_OFFSET, Ordering::Acquire)?),
        })
    }

    pub fn write(&self, region: &SharedRegion, offset: u32) -> RegionResult<()> {
        region.write_u16(offset + CHANNEL_OFFSET, self.channel)?;
        region.write_u16(offset + COMMAND_OFFSET, self.command)?;
        region.store_u32(
            offset + PAYLOAD_SIZE_OFFSET,
            self.payload_size,
            Ordering::Release,
        )?;
        store_result(region, offset, self.result)
    }
}

/// Reads only the result field of the buffer at `offset`.
pub fn load_result(region: &SharedRegion, offset: u32) -> RegionResult<ResultCode> {
    Ok(ResultCode(region.load_i32(offset + RESULT_OFFSET, Ordering::Acquire)?))
}

/// Overwrites only the result field of the buffer at `offset`.
pub fn store_result(region: &SharedRegion, offset: u32, result: ResultCode) -> RegionResult<()> {
    region.store_i32(offset + RESULT_OFFSET, result.0, Ordering::Release)
}

bitflags! {
    /// Flags of the ENABLE payload.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EnableFlags: u32 {
        const ENABLE = 1 << 0;
        const DISABLE = 1 << 1;
        /// `screen_index` is meaningful.
        const EXTENDED = 1 << 2;
        /// `ring_base_offset` is relative to the region start instead of the
        /// data ring area.
        const ABSOFFSET = 1 << 3;
    }
}

/// ENABLE request/response payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnablePayload {
    pub flags: EnableFlags,
    pub ring_base_offset: u32,
    pub screen_index: i32,
    pub result: ResultCode,
}

impl EnablePayload {
    pub const LEN: u32 = 16;
    const RESULT_OFFSET: u32 = 12;

    pub fn read(region: &SharedRegion, offset: u32) -> RegionResult<Self> {
        Ok(Self {
            flags: EnableFlags::from_bits_retain(region.load_u32(offset, Ordering::Acquire)?),
            ring_base_offset: region.load_u32(offset + 4, Ordering::Acquire)?,
            screen_index: region.load_i32(offset + 8, Ordering::Acquire)?,
            result: ResultCode(region.load_i32(offset + Self::RESULT_OFFSET, Ordering::Acquire)?),
        })
    }

    pub fn write(&self, region: &SharedRegion, offset: u32) -> RegionResult<()> {
        region.store_u32(offset, self.flags.bits(), Ordering::Release)?;
        region.store_u32(offset + 4, self.ring_base_offset, Ordering::Release)?;
        region.store_i32(offset + 8, self.screen_index, Ordering::Release)?;
        Self::store_result(region, offset, self.result)
    }

    /// Host side: fills in the payload-level result.
    pub fn store_result(region: &SharedRegion, offset: u32, result: ResultCode) -> RegionResult<()> {
        region.store_i32(offset + Self::RESULT_OFFSET, result.0, Ordering::Release)
    }
}

/// Configuration values readable through QUERY_CONF32.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfIndex {
    MonitorCount = 0,
    HostHeapSize = 1,
    ModeHintReporting = 2,
    GuestCursorReporting = 3,
    CursorCapabilities = 4,
    ScreenFlags = 5,
    MaxRecordSize = 6,
}

impl ConfIndex {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ConfIndex::MonitorCount),
            1 => Some(ConfIndex::HostHeapSize),
            2 => Some(ConfIndex::ModeHintReporting),
            3 => Some(ConfIndex::GuestCursorReporting),
            4 => Some(ConfIndex::CursorCapabilities),
            5 => Some(ConfIndex::ScreenFlags),
            6 => Some(ConfIndex::MaxRecordSize),
            _ => None,
        }
    }
}

impl From<ConfIndex> for u32 {
    fn from(index: ConfIndex) -> Self {
        index as u32
    }
}

/// QUERY_CONF32 / SET_CONF32 payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conf32Payload {
    pub index: u32,
    pub value: u32,
}

impl Conf32Payload {
    pub const LEN: u32 = 8;

    pub fn read(region: &SharedRegion, offset: u32) -> RegionResult<Self> {
        Ok(Self {
            index: region.load_u32(offset, Ordering::Acquire)?,
            value: region.load_u32(offset + 4, Ordering::Acquire)?,
        })
    }

    pub fn write(&self, region: &SharedRegion, offset: u32) -> RegionResult<()> {
        region.store_u32(offset, self.index, Ordering::Release)?;
        region.store_u32(offset + 4, self.value, Ordering::Release)
    }
}

bitflags! {
    /// Capabilities the guest driver reports through INFO_CAPS.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GuestCaps: u32 {
        /// Command completion is polled rather than signalled.
        const POLLED_COMPLETION = 1 << 0;
        /// The guest handles the device interrupt.
        const IRQ = 1 << 1;
        /// The guest asks for video mode hints.
        const MODE_HINTS = 1 << 2;
        /// The guest draws its own cursor.
        const NO_CURSOR_INTEGRATION = 1 << 3;
        /// Screen updates arrive exclusively through the data ring.
        const STREAM_ONLY = 1 << 4;
    }
}

/// INFO_CAPS payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapsPayload {
    pub caps: GuestCaps,
    pub result: ResultCode,
}

impl CapsPayload {
    pub const LEN: u32 = 8;

    pub fn read(region: &SharedRegion, offset: u32) -> RegionResult<Self> {
        Ok(Self {
            caps: GuestCaps::from_bits_retain(region.load_u32(offset, Ordering::Acquire)?),
            result: ResultCode(region.load_i32(offset + 4, Ordering::Acquire)?),
        })
    }

    pub fn write(&self, region: &SharedRegion, offset: u32) -> RegionResult<()> {
        region.store_u32(offset, self.caps.bits(), Ordering::Release)?;
        region.store_i32(offset + 4, self.result.0, Ordering::Release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_region::RegionConfig;

    /// The header layout is ABI: pin every field to its byte offset.
    #[test]
    fn header_fields_sit_at_fixed_offsets() {
        let region = SharedRegion::new(RegionConfig::default()).unwrap();
        let offset = region.layout().control_heap.offset;
        BufferHeader {
            channel: DISPLAY_CHANNEL,
            command: Command::Enable.into(),
            payload_size: EnablePayload::LEN,
            result: ResultCode::NOT_SUPPORTED,
        }
        .write(&region, offset)
        .unwrap();

        let mut raw = [0u8; HEADER_LEN as usize];
        region.read_bytes(offset, &mut raw).unwrap();
        assert_eq!(&raw[0..2], &DISPLAY_CHANNEL.to_le_bytes());
        assert_eq!(&raw[2..4], &7u16.to_le_bytes());
        assert_eq!(&raw[4..8], &16u32.to_le_bytes());
        assert_eq!(&raw[8..12], &(-37i32).to_le_bytes());
    }

    #[test]
    fn enable_payload_layout() {
        let region = SharedRegion::new(RegionConfig::default()).unwrap();
        let offset = region.layout().control_heap.offset + HEADER_LEN;
        let payload = EnablePayload {
            flags: EnableFlags::ENABLE | EnableFlags::EXTENDED | EnableFlags::ABSOFFSET,
            ring_base_offset: 0x1234,
            screen_index: -1,
            result: ResultCode::OK,
        };
        payload.write(&region, offset).unwrap();
        assert_eq!(EnablePayload::read(&region, offset).unwrap(), payload);

        let mut raw = [0u8; EnablePayload::LEN as usize];
        region.read_bytes(offset, &mut raw).unwrap();
        assert_eq!(&raw[0..4], &0b1101u32.to_le_bytes());
        assert_eq!(&raw[4..8], &0x1234u32.to_le_bytes());
        assert_eq!(&raw[8..12], &(-1i32).to_le_bytes());
        assert_eq!(&raw[12..16], &0i32.to_le_bytes());
    }

    #[test]
    fn command_and_index_decoding_rejects_unknown_values() {
        assert_eq!(Command::from_u16(5), Some(Command::Flush));
        assert_eq!(Command::from_u16(3), None);
        assert_eq!(ConfIndex::from_u32(6), Some(ConfIndex::MaxRecordSize));
        assert_eq!(ConfIndex::from_u32(7), None);
        assert!(ResultCode::OK.is_success());
        assert!(!ResultCode::NOT_IMPLEMENTED.is_success());
        assert_eq!(ResultCode(-99).to_string(), "status -99");
    }
}
