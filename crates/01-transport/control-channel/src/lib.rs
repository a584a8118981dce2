//! Synchronous request/response channel between the guest driver and the host.
//!
//! A request is a [`ControlBuffer`] carved from the control heap of the shared
//! region: a fixed header followed by a command-specific payload. The guest
//! rings the [`Doorbell`] with the buffer offset and reads the host's answer
//! from the same bytes once `submit` returns.

mod buffer;
mod channel;
mod error;
mod heap;
pub mod wire;

pub use buffer::ControlBuffer;
pub use channel::{ControlChannel, Doorbell, Reply};
pub use error::{ChannelError, ChannelResult};
pub use heap::{ControlHeap, BLOCK_ALIGN};
pub use wire::{
    BufferHeader, CapsPayload, Command, Conf32Payload, ConfIndex, EnableFlags, EnablePayload,
    GuestCaps, ResultCode, DISPLAY_CHANNEL, HEADER_LEN,
};
