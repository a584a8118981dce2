use shared_region::RegionError;
use thiserror::Error;

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Local failures of the control channel.
///
/// Command-level failures are not errors: the host reports them through the
/// result code of the buffer (see [`crate::ResultCode`]).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("control heap exhausted: requested {requested} bytes, largest free block {largest_free}")]
    NoMemory { requested: u32, largest_free: u32 },

    #[error("payload of {len} bytes does not fit a control buffer")]
    PayloadTooLarge { len: usize },

    #[error("payload access of {len} bytes at {at} exceeds the {payload_len}-byte payload")]
    PayloadRange { at: u32, len: usize, payload_len: u32 },

    #[error("region error: {0}")]
    Region(#[from] RegionError),
}
