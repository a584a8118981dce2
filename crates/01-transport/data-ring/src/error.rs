use control_channel::{ChannelError, ResultCode};
use shared_region::RegionError;
use thiserror::Error;

pub type RingResult<T> = Result<T, RingError>;

/// Errors surfaced by the guest side of the data ring.
#[derive(Debug, Error)]
pub enum RingError {
    #[error("data ring is not enabled")]
    NotEnabled,

    #[error("a record is already open")]
    RecordAlreadyOpen,

    #[error("no record is open")]
    NoOpenRecord,

    /// Every descriptor slot is in use, even after a flush. Recoverable.
    #[error("record descriptor queue is full")]
    QueueFull,

    /// The byte ring stayed below the partial write threshold after a flush.
    /// Sticky until the ring is enabled again.
    #[error("data ring overflowed")]
    Overflow,

    #[error("host disabled the data ring")]
    HostDisabled,

    #[error("host rejected enable: {code}")]
    EnableRejected { code: ResultCode },

    #[error("no data ring for screen {screen}")]
    NoSuchScreen { screen: u32 },

    #[error("invalid ring area: {0}")]
    InvalidArea(&'static str),

    #[error("invalid ring configuration: {0}")]
    InvalidConfig(&'static str),

    /// A host-owned index read back out of range.
    #[error("ring header corrupt: {0}")]
    Corrupt(&'static str),

    #[error("control channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("region error: {0}")]
    Region(#[from] RegionError),
}
