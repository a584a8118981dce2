//! Guest side of the streaming data ring.
//!
//! A ring is a header, a circular queue of record descriptors and a circular
//! byte buffer living in the data ring area of the shared region. The guest
//! appends records through a [`RingWriter`]; the host consumes them and
//! advances its read cursor, either on its own schedule or when the writer
//! runs short of space and flushes.
//!
//! Layout accessors ([`RingView`], [`DescriptorQueue`]) are shared with the
//! host backend.

mod display;
mod error;
pub mod layout;
mod queue;
mod ring;
mod writer;

pub use display::{partition, GuestDisplay};
pub use error::{RingError, RingResult};
pub use layout::{
    available, used, Descriptor, RecordFlags, RingArea, RingConfig, RingEvents, RingView,
    DEFAULT_PARTIAL_WRITE_THRESHOLD, DESCRIPTOR_COUNT, RING_HEADER_LEN,
};
pub use queue::{next_index, DescriptorQueue};
pub use ring::{DataRing, RingState};
pub use writer::RingWriter;
