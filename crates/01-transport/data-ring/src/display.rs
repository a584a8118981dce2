//! Multi-screen guest front end shared between producer threads.

use crate::error::{RingError, RingResult};
use crate::layout::{RingArea, RingConfig, RING_HEADER_LEN};
use crate::ring::DataRing;
use crate::writer::RingWriter;
use control_channel::ControlChannel;
use parking_lot::Mutex;
use shared_region::{HostOps, Span, REGION_ALIGN};
use std::sync::Arc;

struct GuestInner {
    channel: ControlChannel,
    rings: Vec<DataRing>,
}

/// The control channel plus one data ring per screen, behind one lock.
///
/// Every call holds the lock for its whole duration, which keeps the
/// single-writer rule for each ring and serialises control requests.
pub struct GuestDisplay {
    inner: Mutex<GuestInner>,
    areas: Vec<RingArea>,
}

impl GuestDisplay {
    /// Splits the data ring area evenly between `screens` rings.
    pub fn new(channel: ControlChannel, screens: u32, config: RingConfig) -> RingResult<Arc<Self>> {
        let areas = partition(channel.region().layout().data_ring, screens)?;
        for area in &areas {
            config.validate(area.capacity())?;
        }
        let rings = areas.iter().map(|_| DataRing::new(config)).collect();
        Ok(Arc::new(Self {
            inner: Mutex::new(GuestInner { channel, rings }),
            areas,
        }))
    }

    pub fn screen_count(&self) -> u32 {
        self.areas.len() as u32
    }

    /// Area assigned to `screen`.
    pub fn ring_area(&self, screen: u32) -> RingResult<RingArea> {
        self.areas
            .get(screen as usize)
            .copied()
            .ok_or(RingError::NoSuchScreen { screen })
    }

    /// Enables the ring of `screen`. Multi-screen setups address the host by
    /// screen index; a single screen uses the area-relative form.
    pub fn enable(&self, screen: u32) -> RingResult<()> {
        let area = self.ring_area(screen)?;
        let target = (self.areas.len() > 1).then_some(screen);
        let mut inner = self.inner.lock();
        let GuestInner { channel, rings } = &mut *inner;
        rings[screen as usize].enable(channel, area, target)
    }

    pub fn disable(&self, screen: u32) -> RingResult<()> {
        let mut inner = self.inner.lock();
        let GuestInner { channel, rings } = &mut *inner;
        let ring = rings
            .get_mut(screen as usize)
            .ok_or(RingError::NoSuchScreen { screen })?;
        ring.disable(channel);
        Ok(())
    }

    pub fn disable_all(&self) {
        let mut inner = self.inner.lock();
        let GuestInner { channel, rings } = &mut *inner;
        for ring in rings.iter_mut() {
            ring.disable(channel);
        }
    }

    pub fn is_enabled(&self, screen: u32) -> bool {
        self.inner
            .lock()
            .rings
            .get(screen as usize)
            .is_some_and(DataRing::is_enabled)
    }

    pub fn host_ops(&self, screen: u32) -> HostOps {
        self.inner
            .lock()
            .rings
            .get(screen as usize)
            .map(DataRing::host_ops)
            .unwrap_or_default()
    }

    /// Runs `f` with exclusive access to the writer of `screen`.
    pub fn with_writer<R>(
        &self,
        screen: u32,
        f: impl FnOnce(&mut RingWriter<'_>) -> R,
    ) -> RingResult<R> {
        let mut inner = self.inner.lock();
        let GuestInner { channel, rings } = &mut *inner;
        let ring = rings
            .get_mut(screen as usize)
            .ok_or(RingError::NoSuchScreen { screen })?;
        let mut writer = ring.writer(channel);
        Ok(f(&mut writer))
    }

    /// Writes one complete record to the ring of `screen`.
    pub fn write_record(&self, screen: u32, bytes: &[u8]) -> RingResult<()> {
        self.with_writer(screen, |writer| writer.write_record(bytes))?
    }

    /// Runs `f` with exclusive access to the control channel.
    pub fn with_channel<R>(&self, f: impl FnOnce(&mut ControlChannel) -> R) -> R {
        f(&mut self.inner.lock().channel)
    }
}

/// Equal, aligned slices of `data_ring`, one per screen.
pub fn partition(data_ring: Span, screens: u32) -> RingResult<Vec<RingArea>> {
    if screens == 0 {
        return Err(RingError::InvalidConfig("at least one screen is required"));
    }
    let slice = (data_ring.len / screens) & !(REGION_ALIGN - 1);
    if slice <= RING_HEADER_LEN + 1 {
        return Err(RingError::InvalidArea("data ring area too small for every screen"));
    }
    Ok((0..screens)
        .map(|screen| RingArea::new(data_ring.offset + screen * slice, slice))
        .collect())
}
