//! Host end of the control channel and the data rings.

use crate::config::HostConfig;
use crate::consumer::RingConsumer;
use crate::error::{HostError, HostResult};
use crate::sink::RecordSink;
use control_channel::wire::store_result;
use control_channel::{
    BufferHeader, CapsPayload, Command, Conf32Payload, ConfIndex, Doorbell, EnableFlags,
    EnablePayload, GuestCaps, ResultCode, DISPLAY_CHANNEL, HEADER_LEN,
};
use parking_lot::Mutex;
use shared_region::{HostEvents, HostOps, HostStatus, SharedRegion};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Cursor capability value: the host draws the pointer.
pub const CURSOR_CAPABILITY_HARDWARE: u32 = 1 << 0;

/// Screen state flags the host understands (active, disabled, blank, blank2).
pub const SUPPORTED_SCREEN_FLAGS: u32 = 0x000F;

struct HostState<S> {
    sink: S,
    screens: Vec<Option<RingConsumer>>,
    guest_caps: GuestCaps,
    status: HostStatus,
}

/// Device-side implementation of the [`Doorbell`].
///
/// Each submitted buffer is executed synchronously under the state lock, so
/// the guest sees the result as soon as `submit` returns. [`HostBackend::tick`]
/// drains the rings on the host's own schedule from any thread.
pub struct HostBackend<S> {
    region: Arc<SharedRegion>,
    config: HostConfig,
    state: Mutex<HostState<S>>,
}

impl<S: RecordSink> HostBackend<S> {
    pub fn new(region: Arc<SharedRegion>, config: HostConfig, sink: S) -> HostResult<Arc<Self>> {
        config.validate()?;
        let status = HostStatus::default();
        status.store(&region)?;
        let screens = (0..config.screen_count).map(|_| None).collect();
        Ok(Arc::new(Self {
            region,
            config,
            state: Mutex::new(HostState {
                sink,
                screens,
                guest_caps: GuestCaps::empty(),
                status,
            }),
        }))
    }

    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    pub fn config(&self) -> HostConfig {
        self.config
    }

    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().sink)
    }

    pub fn guest_caps(&self) -> GuestCaps {
        self.state.lock().guest_caps
    }

    pub fn is_enabled(&self, screen: u32) -> bool {
        self.state
            .lock()
            .screens
            .get(screen as usize)
            .is_some_and(Option::is_some)
    }

    /// Drains every enabled ring.
    ///
    /// On corrupt guest data all rings are torn down before the error is
    /// returned.
    pub fn tick(&self) -> HostResult<usize> {
        self.state.lock().flush_all(&self.region, &self.config)
    }

    /// Sets `events` in the host status block.
    pub fn raise_events(&self, events: HostEvents) -> HostResult<()> {
        let mut state = self.state.lock();
        state.status.events |= events;
        Ok(state.status.store(&self.region)?)
    }

    /// Clears `events` in the host status block.
    pub fn clear_events(&self, events: HostEvents) -> HostResult<()> {
        let mut state = self.state.lock();
        state.status.events -= events;
        Ok(state.status.store(&self.region)?)
    }

    /// Tears down every ring, for example when the device is reset.
    pub fn disable_all(&self) {
        let mut state = self.state.lock();
        state.cleanup_all(&self.region);
    }

    fn dispatch(&self, offset: u32) {
        let heap = self.region.layout().control_heap;
        if !heap.contains(offset, HEADER_LEN) {
            warn!(offset, "doorbell for a buffer outside the control heap");
            return;
        }
        let header = match BufferHeader::read(&self.region, offset) {
            Ok(header) => header,
            Err(err) => {
                warn!(%err, offset, "unreadable control buffer");
                return;
            }
        };

        let payload = offset + HEADER_LEN;
        let result = if header.channel != DISPLAY_CHANNEL {
            debug!(channel = header.channel, "unknown channel");
            ResultCode::NOT_SUPPORTED
        } else if !heap.contains(payload, header.payload_size) {
            warn!(offset, payload_size = header.payload_size, "payload exceeds the control heap");
            ResultCode::INVALID_PARAMETER
        } else {
            let mut state = self.state.lock();
            match state.execute(&self.region, &self.config, header, payload) {
                Ok(code) => code,
                Err(err) => {
                    warn!(%err, command = header.command, "control command failed");
                    ResultCode::INVALID_PARAMETER
                }
            }
        };

        if let Err(err) = store_result(&self.region, offset, result) {
            warn!(%err, offset, "failed to store control result");
        }
        trace!(offset, command = header.command, %result, "control buffer done");
    }
}

impl<S: RecordSink + 'static> Doorbell for HostBackend<S> {
    fn submit(&self, offset: u32) {
        self.dispatch(offset);
    }
}

impl<S: RecordSink> HostState<S> {
    fn execute(
        &mut self,
        region: &SharedRegion,
        config: &HostConfig,
        header: BufferHeader,
        payload: u32,
    ) -> HostResult<ResultCode> {
        let Some(command) = Command::from_u16(header.command) else {
            debug!(command = header.command, "unknown command");
            return Ok(ResultCode::NOT_IMPLEMENTED);
        };
        let needed = match command {
            Command::QueryConf32 | Command::SetConf32 => Conf32Payload::LEN,
            Command::InfoCaps => CapsPayload::LEN,
            Command::Enable => EnablePayload::LEN,
            Command::Flush => 0,
        };
        if header.payload_size < needed {
            warn!(?command, payload_size = header.payload_size, "short payload");
            return Ok(ResultCode::INVALID_PARAMETER);
        }

        match command {
            Command::QueryConf32 => {
                let mut conf = Conf32Payload::read(region, payload)?;
                let Some(value) = query_conf32(config, conf.index) else {
                    warn!(index = conf.index, "query for unknown configuration value");
                    return Ok(ResultCode::INVALID_PARAMETER);
                };
                conf.value = value;
                conf.write(region, payload)?;
                Ok(ResultCode::OK)
            }
            Command::SetConf32 => {
                let conf = Conf32Payload::read(region, payload)?;
                match ConfIndex::from_u32(conf.index) {
                    // Both are constants; accept and ignore.
                    Some(ConfIndex::MonitorCount | ConfIndex::HostHeapSize) => Ok(ResultCode::OK),
                    _ => {
                        warn!(index = conf.index, value = conf.value, "set of unsupported value");
                        Ok(ResultCode::INVALID_PARAMETER)
                    }
                }
            }
            Command::InfoCaps => {
                let mut caps = CapsPayload::read(region, payload)?;
                self.guest_caps = caps.caps;
                self.sink.caps_changed(caps.caps);
                caps.result = ResultCode::OK;
                caps.write(region, payload)?;
                debug!(caps = caps.caps.bits(), "guest capabilities");
                Ok(ResultCode::OK)
            }
            Command::Flush => match self.flush_all(region, config) {
                Ok(_) => Ok(ResultCode::OK),
                Err(_) => Ok(ResultCode::NOT_SUPPORTED),
            },
            Command::Enable => {
                let request = EnablePayload::read(region, payload)?;
                let code = self.handle_enable(region, config, request);
                EnablePayload::store_result(region, payload, code)?;
                Ok(code)
            }
        }
    }

    fn handle_enable(
        &mut self,
        region: &SharedRegion,
        config: &HostConfig,
        request: EnablePayload,
    ) -> ResultCode {
        let screen = if request.flags.contains(EnableFlags::EXTENDED) {
            match u32::try_from(request.screen_index) {
                Ok(screen) => screen,
                Err(_) => return ResultCode::INVALID_PARAMETER,
            }
        } else {
            0
        };
        if screen >= config.screen_count {
            warn!(screen, screens = config.screen_count, "enable for unknown screen");
            return ResultCode::INVALID_PARAMETER;
        }

        let mode = request.flags & (EnableFlags::ENABLE | EnableFlags::DISABLE);
        if mode == EnableFlags::DISABLE {
            // Drain what the guest already produced; corruption here is
            // handled inside the flush.
            let _ = self.flush_all(region, config);
            self.cleanup(region, screen);
            if screen == 0 {
                self.guest_caps = GuestCaps::empty();
                self.sink.caps_changed(self.guest_caps);
            }
            info!(screen, "data ring disabled");
            return ResultCode::OK;
        }
        if mode != EnableFlags::ENABLE {
            warn!(flags = request.flags.bits(), "enable needs exactly one of ENABLE and DISABLE");
            return ResultCode::INVALID_PARAMETER;
        }

        let base = if request.flags.contains(EnableFlags::ABSOFFSET) {
            Some(request.ring_base_offset)
        } else {
            region
                .layout()
                .data_ring
                .offset
                .checked_add(request.ring_base_offset)
        };
        let consumer = match base
            .ok_or(HostError::InvalidRing("ring offset overflows"))
            .and_then(|base| RingConsumer::attach(region, base))
        {
            Ok(consumer) => consumer,
            Err(err) => {
                warn!(%err, screen, "rejecting data ring");
                return ResultCode::INVALID_PARAMETER;
            }
        };
        let clash = self
            .screens
            .iter()
            .enumerate()
            .filter(|&(other, _)| other != screen as usize)
            .filter_map(|(_, slot)| slot.as_ref())
            .any(|other| other.overlaps(consumer.area()));
        if clash {
            warn!(screen, "data ring overlaps another screen's ring");
            return ResultCode::INVALID_PARAMETER;
        }

        let _ = self.flush_all(region, config);
        self.cleanup(region, screen);

        let ops = match self.sink.enable(screen) {
            Ok(ops) => ops,
            Err(code) => {
                info!(screen, %code, "sink refused data ring");
                return code;
            }
        };
        if let Err(err) = consumer.accept(region, ops) {
            warn!(%err, screen, "failed to publish ring flags");
            self.sink.disable(screen);
            return ResultCode::INVALID_PARAMETER;
        }
        self.status.supported_ops |= ops;
        if let Err(err) = self.status.store(region) {
            warn!(%err, "failed to publish host status");
        }

        info!(
            screen,
            base = consumer.area().base,
            capacity = consumer.area().capacity(),
            ops = ops.bits(),
            "data ring enabled"
        );
        self.screens[screen as usize] = Some(consumer);
        ResultCode::OK
    }

    /// Runs one consumption pass over every enabled ring.
    fn flush_all(&mut self, region: &SharedRegion, config: &HostConfig) -> HostResult<usize> {
        let mut delivered = 0;
        let mut failure = None;
        for (screen, slot) in self.screens.iter_mut().enumerate() {
            let Some(consumer) = slot.as_mut() else {
                continue;
            };
            let sink = &mut self.sink;
            let polled = consumer.poll(region, config.max_record_size, |bytes| {
                sink.record(screen as u32, bytes);
            });
            match polled {
                Ok(count) => delivered += count,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        match failure {
            None => Ok(delivered),
            Some(err) => {
                error!(%err, "disabling data rings");
                self.cleanup_all(region);
                Err(err)
            }
        }
    }

    fn cleanup(&mut self, region: &SharedRegion, screen: u32) {
        if let Some(consumer) = self.screens[screen as usize].take() {
            consumer.release(region);
            self.sink.disable(screen);
        }
    }

    fn cleanup_all(&mut self, region: &SharedRegion) {
        self.guest_caps = GuestCaps::empty();
        self.sink.caps_changed(self.guest_caps);
        for screen in 0..self.screens.len() as u32 {
            self.cleanup(region, screen);
        }
        self.status.supported_ops = HostOps::empty();
        if let Err(err) = self.status.store(region) {
            warn!(%err, "failed to publish host status");
        }
    }
}

fn query_conf32(config: &HostConfig, index: u32) -> Option<u32> {
    // Probe value some guests use to check the channel works at all.
    if index == u32::MAX {
        return Some(u32::MAX);
    }
    let value = match ConfIndex::from_u32(index)? {
        ConfIndex::MonitorCount => config.screen_count,
        ConfIndex::HostHeapSize => config.heap_size_hint,
        ConfIndex::ModeHintReporting | ConfIndex::GuestCursorReporting => 0,
        ConfIndex::CursorCapabilities => CURSOR_CAPABILITY_HARDWARE,
        ConfIndex::ScreenFlags => SUPPORTED_SCREEN_FLAGS,
        ConfIndex::MaxRecordSize => config.max_record_size,
    };
    Some(value)
}
