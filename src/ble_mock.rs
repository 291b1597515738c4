//! Mock BLE subsystem for tests and host development.
//!
//! Every link allocation, transport close, and release (drop) is counted,
//! so tests can assert balanced acquire/release behavior across failure
//! paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::ble::{BleLink, BleManager};
use crate::error::{DcError, DcResult};

#[derive(Debug, Default)]
struct CounterInner {
    created: AtomicUsize,
    closed: AtomicUsize,
    released: AtomicUsize,
    written: Mutex<Vec<u8>>,
}

/// Shared view of the mock's bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct MockCounters {
    inner: Arc<CounterInner>,
}

impl MockCounters {
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.written.lock().unwrap().clone()
    }
}

/// Mock link. Released when dropped, like a real link object.
#[derive(Debug)]
pub struct MockLink {
    counters: MockCounters,
    read_data: Vec<u8>,
    pub connected_to: Option<String>,
    fail_io: bool,
}

impl BleLink for MockLink {
    fn set_timeout(&mut self, _timeout_ms: i32) -> DcResult<()> {
        Ok(())
    }

    fn read(&mut self, data: &mut [u8]) -> DcResult<usize> {
        if self.fail_io {
            return Err(DcError::Io("mock read failure".to_string()));
        }
        let n = self.read_data.len().min(data.len());
        data[..n].copy_from_slice(&self.read_data[..n]);
        self.read_data.drain(..n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> DcResult<usize> {
        if self.fail_io {
            return Err(DcError::Io("mock write failure".to_string()));
        }
        self.counters.inner.written.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn ioctl(&mut self, _request: u32, _data: &mut [u8]) -> DcResult<()> {
        Ok(())
    }

    fn sleep(&mut self, _milliseconds: u32) -> DcResult<()> {
        Ok(())
    }

    fn close(&mut self) -> DcResult<()> {
        self.counters.inner.closed.fetch_add(1, Ordering::SeqCst);
        self.connected_to = None;
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.counters.inner.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock manager. Only addresses registered with [`with_device`] accept a
/// connection.
///
/// [`with_device`]: MockBleManager::with_device
#[derive(Clone, Debug, Default)]
pub struct MockBleManager {
    counters: MockCounters,
    devices: Vec<String>,
    read_data: Vec<u8>,
    fail_create: bool,
    fail_io: bool,
}

impl MockBleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: &str) -> Self {
        self.devices.push(address.to_string());
        self
    }

    pub fn with_read_data(mut self, data: Vec<u8>) -> Self {
        self.read_data = data;
        self
    }

    pub fn with_create_failure(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_io_failure(mut self) -> Self {
        self.fail_io = true;
        self
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }
}

impl BleManager for MockBleManager {
    type Link = MockLink;

    fn initialize(&self) {}

    fn create(&self) -> Option<MockLink> {
        if self.fail_create {
            return None;
        }
        self.counters.inner.created.fetch_add(1, Ordering::SeqCst);
        Some(MockLink {
            counters: self.counters.clone(),
            read_data: self.read_data.clone(),
            connected_to: None,
            fail_io: self.fail_io,
        })
    }

    fn connect(&self, link: &mut MockLink, address: &str) -> bool {
        if self.devices.iter().any(|d| d == address) {
            link.connected_to = Some(address.to_string());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_drop_counts_release() {
        let manager = MockBleManager::new().with_device("addr");
        let mut link = manager.create().unwrap();
        assert!(manager.connect(&mut link, "addr"));
        drop(link);
        assert_eq!(manager.counters().created(), 1);
        assert_eq!(manager.counters().released(), 1);
        assert_eq!(manager.counters().closed(), 0);
    }

    #[test]
    fn test_unknown_address_refuses_connect() {
        let manager = MockBleManager::new();
        let mut link = manager.create().unwrap();
        assert!(!manager.connect(&mut link, "nope"));
        assert!(link.connected_to.is_none());
    }
}
