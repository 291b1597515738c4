//! Seam to the dive computer protocol engine.
//!
//! The engine owns the per-vendor protocol decoders and the descriptor
//! catalog. This crate only plugs a stream into it and listens for the
//! events it raises while the caller drives a download.

use crate::descriptor::{Descriptor, DescriptorCatalog};
use crate::error::DcResult;
use crate::models::{ClockEvent, DeviceInfoEvent, ProgressEvent};
use crate::stream::Stream;

pub const EVENT_WAITING: u32 = 1 << 0;
pub const EVENT_PROGRESS: u32 = 1 << 1;
pub const EVENT_DEVINFO: u32 = 1 << 2;
pub const EVENT_CLOCK: u32 = 1 << 3;
pub const EVENT_VENDOR: u32 = 1 << 4;

/// Typed event raised by the engine from within calls the caller makes on
/// the device handle.
#[derive(Clone, Debug)]
pub enum DeviceEvent {
    DeviceInfo(DeviceInfoEvent),
    Progress(ProgressEvent),
    Clock(ClockEvent),
    Other,
}

/// The slice of a device handle an event handler may touch: pushing a
/// fingerprint down so the engine can skip already-downloaded dives.
pub trait FingerprintSink {
    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> DcResult<()>;
}

/// Event consumer registered on a device handle. Invoked synchronously by
/// the engine; the sink is the device the event originated from.
pub type EventHandler = Box<dyn FnMut(&mut dyn FingerprintSink, &DeviceEvent) + Send>;

/// An open device handle.
pub trait Device: FingerprintSink {
    /// Subscribe to the event types set in `mask`. Replaces any previous
    /// handler.
    fn set_events(&mut self, mask: u32, handler: EventHandler) -> DcResult<()>;

    /// Close the device. Consumes the handle; the stream handed to
    /// [`ProtocolEngine::open_device`] is closed along with it.
    fn close(self) -> DcResult<()>;
}

/// Caller-supplied store of fingerprints from earlier downloads, keyed by
/// device type and serial.
pub trait FingerprintStore: Send + Sync {
    fn lookup(&self, device_type: &str, serial: &str) -> Option<Vec<u8>>;
}

/// The protocol engine proper. Also the home of the descriptor catalog.
pub trait ProtocolEngine: DescriptorCatalog {
    type Context;
    type Device: Device;
    type Parser;

    fn new_context(&self) -> DcResult<Self::Context>;

    /// Open the device described by `descriptor` over `stream`. Takes
    /// ownership of the stream; the engine closes it exactly once, whether
    /// the open succeeds or fails.
    fn open_device(
        &self,
        context: &Self::Context,
        descriptor: &Descriptor,
        stream: Box<dyn Stream>,
    ) -> DcResult<Self::Device>;

    /// Build a parser for raw dive data downloaded from a device matching
    /// `descriptor`.
    fn new_parser(
        &self,
        context: &Self::Context,
        descriptor: &Descriptor,
        data: &[u8],
    ) -> DcResult<Self::Parser>;
}
