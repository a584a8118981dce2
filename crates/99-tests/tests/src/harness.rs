use anyhow::Result;
use control_channel::{ControlChannel, ResultCode};
use data_ring::{GuestDisplay, RingConfig, RingView, RING_HEADER_LEN};
use host_backend::{HostBackend, HostConfig, MemorySink};
use shared_region::{HostOps, RegionConfig, SharedRegion, HOST_STATUS_LEN};
use std::sync::Arc;

pub const OPS: HostOps = HostOps::DIRTY_RECT
    .union(HostOps::SOLID_RECT)
    .union(HostOps::SCREEN_BLT);

/// Ring capacity of every screen in [`Device::small`].
pub const SMALL_CAPACITY: u32 = 1024;

const SMALL_HEAP: u32 = 1024;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// Guest and host wired together over one region, every screen enabled.
pub struct Device {
    pub host: Arc<HostBackend<MemorySink>>,
    pub display: Arc<GuestDisplay>,
}

impl Device {
    pub fn new(region: RegionConfig, screens: u32) -> Result<Self> {
        init_tracing();
        let region = Arc::new(SharedRegion::new(region)?);
        let config = HostConfig {
            screen_count: screens,
            ..HostConfig::default()
        };
        let host = HostBackend::new(Arc::clone(&region), config, MemorySink::new(OPS))?;
        let channel = ControlChannel::new(region, host.clone());
        let display = GuestDisplay::new(channel, screens, RingConfig::default())?;
        for screen in 0..screens {
            display.enable(screen)?;
        }
        Ok(Self { host, display })
    }

    /// Region sized so each screen gets a [`SMALL_CAPACITY`] ring.
    pub fn small(screens: u32) -> Result<Self> {
        let region = RegionConfig {
            total_len: HOST_STATUS_LEN + SMALL_HEAP + screens * (RING_HEADER_LEN + SMALL_CAPACITY),
            control_heap_len: SMALL_HEAP,
        };
        Self::new(region, screens)
    }

    pub fn flush(&self) -> Result<ResultCode> {
        Ok(self.display.with_channel(|channel| channel.flush())?)
    }

    pub fn view(&self, screen: u32) -> Result<RingView<'_>> {
        let area = self.display.ring_area(screen)?;
        Ok(RingView::new(self.host.region(), area))
    }

    /// Drains the sink and returns the records of every screen, in order.
    pub fn take_records(&self, screens: u32) -> Vec<Vec<Vec<u8>>> {
        let mut split = vec![Vec::new(); screens as usize];
        for (screen, bytes) in self.host.with_sink(MemorySink::take_records) {
            split[screen as usize].push(bytes);
        }
        split
    }
}

/// Deterministic payload; `seed` keeps neighbouring records distinct.
pub fn payload(len: usize, seed: u32) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed.wrapping_mul(7)) as u8)
        .collect()
}
