//! Circular queue of record descriptors.
//!
//! The guest pushes at `tail` and the host pops at `head`. Both indices stay
//! below [`DESCRIPTOR_COUNT`]; `head == tail` means empty and one slot is
//! always left unused so the queue never wraps over itself.

use crate::error::{RingError, RingResult};
use crate::layout::{Descriptor, RecordFlags, RingView, DESCRIPTOR_COUNT};

/// Index following `index` in the descriptor array.
pub const fn next_index(index: u32) -> u32 {
    (index + 1) % DESCRIPTOR_COUNT
}

#[derive(Clone, Copy)]
pub struct DescriptorQueue<'r> {
    view: RingView<'r>,
}

impl<'r> DescriptorQueue<'r> {
    pub fn new(view: RingView<'r>) -> Self {
        Self { view }
    }

    fn checked(index: u32, what: &'static str) -> RingResult<u32> {
        if index >= DESCRIPTOR_COUNT {
            return Err(RingError::Corrupt(what));
        }
        Ok(index)
    }

    /// Whether pushing another descriptor would run into the host's head.
    pub fn is_full(&self) -> RingResult<bool> {
        let head = Self::checked(self.view.head()?, "head index out of range")?;
        let tail = Self::checked(self.view.tail()?, "tail index out of range")?;
        Ok(next_index(tail) == head)
    }

    /// Guest side: claims the slot at `tail` as an open record.
    ///
    /// The descriptor is initialised before the new tail is published.
    /// Returns `None` when the queue is full.
    pub fn try_push(&self) -> RingResult<Option<u32>> {
        if self.is_full()? {
            return Ok(None);
        }
        let index = self.view.tail()?;
        self.view.store_descriptor_len(index, 0)?;
        self.view.store_descriptor_flags(index, RecordFlags::PARTIAL)?;
        self.view.store_tail(next_index(index))?;
        Ok(Some(index))
    }

    /// Guest side: publishes the running length of an open record.
    pub fn set_len(&self, index: u32, len: u32) -> RingResult<()> {
        self.view.store_descriptor_len(index, len)
    }

    /// Guest side: marks the record at `index` as final.
    pub fn complete(&self, index: u32) -> RingResult<()> {
        self.view.store_descriptor_flags(index, RecordFlags::empty())
    }

    /// Host side: the descriptor at the host's `head`, if the guest has
    /// pushed one.
    pub fn pending(&self, head: u32) -> RingResult<Option<Descriptor>> {
        let head = Self::checked(head, "head index out of range")?;
        let tail = Self::checked(self.view.tail()?, "tail index out of range")?;
        if head == tail {
            return Ok(None);
        }
        self.view.descriptor(head).map(Some)
    }

    /// Host side: retires the descriptor at `head` and returns the new head.
    pub fn pop(&self, head: u32) -> RingResult<u32> {
        let next = next_index(Self::checked(head, "head index out of range")?);
        self.view.store_head(next)?;
        Ok(next)
    }

    /// Number of pushed descriptors not yet popped.
    pub fn len(&self) -> RingResult<u32> {
        let head = Self::checked(self.view.head()?, "head index out of range")?;
        let tail = Self::checked(self.view.tail()?, "tail index out of range")?;
        Ok((tail + DESCRIPTOR_COUNT - head) % DESCRIPTOR_COUNT)
    }

    pub fn is_empty(&self) -> RingResult<bool> {
        Ok(self.len()? == 0)
    }
}
