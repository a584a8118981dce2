//! Where consumed records go.

use control_channel::{GuestCaps, ResultCode};
use shared_region::HostOps;

/// Host rendering pipeline fed by the backend.
pub trait RecordSink: Send {
    /// The guest enabled the ring of `screen`. Returns the drawing operations
    /// the pipeline accepts, or the code to reject the ring with.
    fn enable(&mut self, screen: u32) -> Result<HostOps, ResultCode>;

    /// One complete record from the ring of `screen`.
    fn record(&mut self, screen: u32, bytes: Vec<u8>);

    /// The ring of `screen` is gone, either by request or after corruption.
    fn disable(&mut self, screen: u32);

    fn caps_changed(&mut self, _caps: GuestCaps) {}
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    ops: HostOps,
    reject: Option<ResultCode>,
    records: Vec<(u32, Vec<u8>)>,
    enabled: Vec<u32>,
    disabled: Vec<u32>,
    caps: GuestCaps,
}

impl MemorySink {
    pub fn new(ops: HostOps) -> Self {
        Self {
            ops,
            ..Self::default()
        }
    }

    /// Sink refusing every ring with `code`.
    pub fn rejecting(code: ResultCode) -> Self {
        Self {
            reject: Some(code),
            ..Self::default()
        }
    }

    pub fn set_reject(&mut self, reject: Option<ResultCode>) {
        self.reject = reject;
    }

    pub fn records(&self) -> &[(u32, Vec<u8>)] {
        &self.records
    }

    pub fn take_records(&mut self) -> Vec<(u32, Vec<u8>)> {
        std::mem::take(&mut self.records)
    }

    /// Screens in the order they were enabled.
    pub fn enabled(&self) -> &[u32] {
        &self.enabled
    }

    /// Screens in the order they were disabled.
    pub fn disabled(&self) -> &[u32] {
        &self.disabled
    }

    pub fn caps(&self) -> GuestCaps {
        self.caps
    }
}

impl RecordSink for MemorySink {
    fn enable(&mut self, screen: u32) -> Result<HostOps, ResultCode> {
        if let Some(code) = self.reject {
            return Err(code);
        }
        self.enabled.push(screen);
        Ok(self.ops)
    }

    fn record(&mut self, screen: u32, bytes: Vec<u8>) {
        self.records.push((screen, bytes));
    }

    fn disable(&mut self, screen: u32) {
        self.disabled.push(screen);
    }

    fn caps_changed(&mut self, caps: GuestCaps) {
        self.caps = caps;
    }
}
