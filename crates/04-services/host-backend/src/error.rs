use data_ring::RingError;
use shared_region::RegionError;
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

/// Failures inside the host backend.
///
/// None of these reach the guest as errors: they become result codes or a
/// ring cleanup.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid host configuration: {0}")]
    InvalidConfig(&'static str),

    /// The guest described a ring the host refuses to attach.
    #[error("invalid ring: {0}")]
    InvalidRing(&'static str),

    /// Guest-controlled ring state is inconsistent.
    #[error("guest ring data corrupt: {0}")]
    Corrupt(&'static str),

    #[error("ring access failed: {0}")]
    Ring(#[from] RingError),

    #[error("region access failed: {0}")]
    Region(#[from] RegionError),
}
