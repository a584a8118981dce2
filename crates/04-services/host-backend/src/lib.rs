//! Reference host for the display channel.
//!
//! [`HostBackend`] answers control buffers rung through the [`Doorbell`],
//! validates ring enable requests and drains enabled rings into a
//! [`RecordSink`]. Guest-controlled memory is never trusted: malformed
//! requests are answered with result codes and inconsistent ring state tears
//! the rings down instead of panicking.
//!
//! [`Doorbell`]: control_channel::Doorbell

mod backend;
mod config;
mod consumer;
mod error;
mod sink;

pub use backend::{HostBackend, CURSOR_CAPABILITY_HARDWARE, SUPPORTED_SCREEN_FLAGS};
pub use config::{HostConfig, DEFAULT_HEAP_SIZE_HINT, MAX_RECORD_SIZE};
pub use consumer::RingConsumer;
pub use error::{HostError, HostResult};
pub use sink::{MemorySink, RecordSink};
