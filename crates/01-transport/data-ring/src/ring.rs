//! Guest-side lifecycle of one data ring.

use crate::error::{RingError, RingResult};
use crate::layout::{RingArea, RingConfig, RingView};
use crate::writer::RingWriter;
use control_channel::{
    ChannelResult, Command, ControlChannel, EnableFlags, EnablePayload, ResultCode,
};
use shared_region::{HostOps, SharedRegion};
use tracing::{debug, info, warn};

/// Lifecycle of a [`DataRing`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

/// Producer-local bookkeeping for one ring.
///
/// Nothing here is read back from shared memory except the host's cursor,
/// head and event bits, which are re-read on every use.
#[derive(Debug)]
pub struct DataRing {
    config: RingConfig,
    state: RingState,
    area: Option<RingArea>,
    screen: Option<u32>,
    pub(crate) overflow: bool,
    pub(crate) current: Option<u32>,
    host_ops: HostOps,
}

impl DataRing {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            state: RingState::Disabled,
            area: None,
            screen: None,
            overflow: false,
            current: None,
            host_ops: HostOps::empty(),
        }
    }

    pub fn config(&self) -> RingConfig {
        self.config
    }

    pub fn state(&self) -> RingState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == RingState::Enabled
    }

    pub fn area(&self) -> Option<RingArea> {
        self.area
    }

    /// Drawing operations the host accepted, captured once at enable.
    pub fn host_ops(&self) -> HostOps {
        self.host_ops
    }

    pub fn supports(&self, ops: HostOps) -> bool {
        self.host_ops.contains(ops)
    }

    /// Whether the sticky overflow flag is set.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Index of the open record's descriptor, if any.
    pub fn current_record(&self) -> Option<u32> {
        self.current
    }

    pub(crate) fn view<'r>(&self, region: &'r SharedRegion) -> RingResult<RingView<'r>> {
        match (self.state, self.area) {
            (RingState::Enabled, Some(area)) => Ok(RingView::new(region, area)),
            _ => Err(RingError::NotEnabled),
        }
    }

    /// Exclusive producer handle over this ring.
    pub fn writer<'a>(&'a mut self, channel: &'a mut ControlChannel) -> RingWriter<'a> {
        RingWriter::new(self, channel)
    }

    /// Resets the ring in `area` and asks the host to start consuming it.
    ///
    /// With `screen` set the request carries the screen index and an absolute
    /// ring offset; otherwise the offset is relative to the data ring area.
    /// A rejected request leaves the ring disabled.
    pub fn enable(
        &mut self,
        channel: &mut ControlChannel,
        area: RingArea,
        screen: Option<u32>,
    ) -> RingResult<()> {
        let data_ring = channel.region().layout().data_ring;
        area.validate(data_ring)?;
        self.config.validate(area.capacity())?;

        if self.state != RingState::Disabled {
            self.disable(channel);
        }

        self.state = RingState::Enabling;
        self.area = Some(area);
        self.screen = screen;
        self.overflow = false;
        self.current = None;
        self.host_ops = HostOps::empty();

        let outcome = self
            .prepare_header(channel.region(), area)
            .and_then(|()| Ok(send_enable(channel, area, data_ring.offset, screen)?));

        match outcome {
            Ok(code) if code.is_success() => {
                self.state = RingState::Enabled;
                self.host_ops = match RingView::new(channel.region(), area).host_ops() {
                    Ok(ops) => ops,
                    Err(err) => {
                        warn!(%err, "failed to read host operations");
                        HostOps::empty()
                    }
                };
                info!(
                    base = area.base,
                    capacity = area.capacity(),
                    ?screen,
                    host_ops = self.host_ops.bits(),
                    "data ring enabled"
                );
                Ok(())
            }
            Ok(code) => {
                warn!(%code, ?screen, "host rejected data ring");
                self.disable(channel);
                Err(RingError::EnableRejected { code })
            }
            Err(err) => {
                warn!(%err, ?screen, "data ring enable failed");
                self.disable(channel);
                Err(err)
            }
        }
    }

    fn prepare_header(&self, region: &SharedRegion, area: RingArea) -> RingResult<()> {
        let view = RingView::new(region, area);
        view.clear_header()?;
        view.store_threshold(self.config.partial_write_threshold)?;
        view.store_data_len(area.capacity())
    }

    /// Tells the host to stop consuming and clears all ring bookkeeping.
    ///
    /// Never fails and does nothing when already disabled.
    pub fn disable(&mut self, channel: &mut ControlChannel) {
        if self.state == RingState::Disabled {
            return;
        }
        self.state = RingState::Disabling;

        if let Some(area) = self.area {
            let data_ring_offset = channel.region().layout().data_ring.offset;
            match send_disable(channel, area, data_ring_offset, self.screen) {
                Ok(code) if !code.is_success() => debug!(%code, "host refused disable"),
                Ok(_) => {}
                Err(err) => warn!(%err, "disable notification failed"),
            }
            if let Err(err) = RingView::new(channel.region(), area).clear_header() {
                warn!(%err, "failed to clear ring header");
            }
        }

        self.state = RingState::Disabled;
        self.area = None;
        self.screen = None;
        self.overflow = false;
        self.current = None;
        self.host_ops = HostOps::empty();
        debug!("data ring disabled");
    }
}

fn send_enable(
    channel: &mut ControlChannel,
    area: RingArea,
    data_ring_offset: u32,
    screen: Option<u32>,
) -> ChannelResult<ResultCode> {
    send_mode(channel, EnableFlags::ENABLE, area, data_ring_offset, screen)
}

fn send_disable(
    channel: &mut ControlChannel,
    area: RingArea,
    data_ring_offset: u32,
    screen: Option<u32>,
) -> ChannelResult<ResultCode> {
    send_mode(channel, EnableFlags::DISABLE, area, data_ring_offset, screen)
}

/// Issues one ENABLE command and returns the first failing result code, or
/// the payload result when both levels succeed.
fn send_mode(
    channel: &mut ControlChannel,
    mode: EnableFlags,
    area: RingArea,
    data_ring_offset: u32,
    screen: Option<u32>,
) -> ChannelResult<ResultCode> {
    let (flags, ring_base_offset, screen_index) = match screen {
        Some(screen) => (
            mode | EnableFlags::EXTENDED | EnableFlags::ABSOFFSET,
            area.base,
            i32::try_from(screen).unwrap_or(i32::MAX),
        ),
        None => (mode, area.base - data_ring_offset, -1),
    };

    let mut buffer = channel.alloc_display(EnablePayload::LEN as usize, Command::Enable)?;
    let payload = buffer.payload_offset();
    EnablePayload {
        flags,
        ring_base_offset,
        screen_index,
        result: ResultCode::NOT_IMPLEMENTED,
    }
    .write(buffer.region(), payload)?;

    let result = buffer.submit()?;
    if !result.is_success() {
        return Ok(result);
    }
    Ok(EnablePayload::read(buffer.region(), payload)?.result)
}
