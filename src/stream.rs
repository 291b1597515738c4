//! Stream adapter between a BLE link and the protocol engine.
//!
//! The engine drives every dive computer through the same stream contract.
//! The adapter here is pure dispatch: no buffering, no retries, no data
//! translation. Each call forwards to the link primitive and returns its
//! status unchanged.

use tracing::warn;

use crate::ble::{BleLink, BleManager};
use crate::error::{DcError, DcResult};
use crate::models::Transport;

/// Generic packet stream as seen by the protocol engine.
///
/// `close` consumes the stream: it shuts the transport down and releases
/// the underlying link, so no further operation can be issued afterwards.
pub trait Stream {
    fn set_timeout(&mut self, timeout_ms: i32) -> DcResult<()>;
    fn read(&mut self, data: &mut [u8]) -> DcResult<usize>;
    fn write(&mut self, data: &[u8]) -> DcResult<usize>;
    fn ioctl(&mut self, request: u32, data: &mut [u8]) -> DcResult<()>;
    fn sleep(&mut self, milliseconds: u32) -> DcResult<()>;
    fn close(self: Box<Self>) -> DcResult<()>;
    fn transport(&self) -> Transport;
}

impl std::fmt::Debug for dyn Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("transport", &self.transport())
            .finish_non_exhaustive()
    }
}

/// BLE implementation of [`Stream`]. Owns the link for the lifetime of the
/// connection; dropping the stream releases the link.
pub struct BleStream<L: BleLink> {
    link: L,
}

impl<L: BleLink> BleStream<L> {
    /// Wrap an already-connected link. Takes ownership.
    pub fn new(link: L) -> Self {
        BleStream { link }
    }
}

impl<L: BleLink> Stream for BleStream<L> {
    fn set_timeout(&mut self, timeout_ms: i32) -> DcResult<()> {
        self.link.set_timeout(timeout_ms)
    }

    fn read(&mut self, data: &mut [u8]) -> DcResult<usize> {
        self.link.read(data)
    }

    fn write(&mut self, data: &[u8]) -> DcResult<usize> {
        self.link.write(data)
    }

    fn ioctl(&mut self, request: u32, data: &mut [u8]) -> DcResult<()> {
        self.link.ioctl(request, data)
    }

    fn sleep(&mut self, milliseconds: u32) -> DcResult<()> {
        self.link.sleep(milliseconds)
    }

    fn close(mut self: Box<Self>) -> DcResult<()> {
        // Transport-level close first; the link itself is released when
        // the box drops on return, on the error path too.
        self.link.close()
    }

    fn transport(&self) -> Transport {
        Transport::Ble
    }
}

/// Open a BLE packet connection to the device at `address` and wrap it in
/// a ready-to-use stream.
///
/// On any failure the link allocated here is released before returning;
/// no partial state survives.
pub fn open_ble_connection<M: BleManager>(
    manager: &M,
    address: &str,
) -> DcResult<Box<dyn Stream>>
where
    M::Link: 'static,
{
    if address.is_empty() {
        return Err(DcError::InvalidArgument("device address is empty".to_string()));
    }

    manager.initialize();

    let mut link = match manager.create() {
        Some(link) => link,
        None => {
            warn!("ble open: failed to create link object");
            return Err(DcError::NoMemory);
        }
    };

    if !manager.connect(&mut link, address) {
        warn!(address, "ble open: failed to connect");
        // `link` drops here, releasing the object we just created.
        return Err(DcError::Io(format!("failed to connect to {address}")));
    }

    Ok(Box::new(BleStream::new(link)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble_mock::{MockBleManager, MockCounters};

    #[test]
    fn test_open_connection_success() {
        let manager = MockBleManager::new().with_device("AA:BB:CC:DD:EE:FF");
        let stream = open_ble_connection(&manager, "AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(stream.transport(), Transport::Ble);
        assert_eq!(manager.counters().created(), 1);
        assert_eq!(manager.counters().released(), 0);
    }

    #[test]
    fn test_open_connection_empty_address() {
        let manager = MockBleManager::new();
        let err = open_ble_connection(&manager, "").unwrap_err();
        assert!(matches!(err, DcError::InvalidArgument(_)));
        assert_eq!(manager.counters().created(), 0);
    }

    #[test]
    fn test_open_connection_connect_failure_releases_link() {
        let manager = MockBleManager::new(); // knows no devices
        let err = open_ble_connection(&manager, "AA:BB:CC:DD:EE:FF").unwrap_err();
        assert!(matches!(err, DcError::Io(_)));
        assert_eq!(manager.counters().created(), 1);
        assert_eq!(manager.counters().released(), 1);
    }

    #[test]
    fn test_open_connection_allocation_failure() {
        let manager = MockBleManager::new().with_create_failure();
        let err = open_ble_connection(&manager, "AA:BB:CC:DD:EE:FF").unwrap_err();
        assert_eq!(err, DcError::NoMemory);
    }

    #[test]
    fn test_close_releases_link_exactly_once() {
        let manager = MockBleManager::new().with_device("AA:BB:CC:DD:EE:FF");
        let stream = open_ble_connection(&manager, "AA:BB:CC:DD:EE:FF").unwrap();
        stream.close().unwrap();

        let counters: MockCounters = manager.counters();
        assert_eq!(counters.closed(), 1);
        assert_eq!(counters.released(), 1);
    }

    #[test]
    fn test_stream_dispatch_forwards_to_link() {
        let manager = MockBleManager::new()
            .with_device("AA:BB:CC:DD:EE:FF")
            .with_read_data(vec![0x10, 0x20, 0x30]);
        let mut stream = open_ble_connection(&manager, "AA:BB:CC:DD:EE:FF").unwrap();

        stream.set_timeout(5000).unwrap();
        stream.sleep(10).unwrap();

        let written = stream.write(&[0x01, 0x02]).unwrap();
        assert_eq!(written, 2);

        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x10, 0x20, 0x30]);

        assert_eq!(manager.counters().written(), vec![0x01, 0x02]);
    }
}
