//! Seam to the external BLE subsystem.
//!
//! The radio stack lives outside this crate (CoreBluetooth, BlueZ, a test
//! double). It hands out one link object per physical connection; the link
//! is released by dropping it, after `close` has shut the transport down.

use crate::error::DcResult;

/// One established (or connecting) BLE link.
///
/// All operations block for as long as the underlying transport does.
/// Callers must issue operations sequentially; no internal locking is
/// provided.
pub trait BleLink {
    fn set_timeout(&mut self, timeout_ms: i32) -> DcResult<()>;
    fn read(&mut self, data: &mut [u8]) -> DcResult<usize>;
    fn write(&mut self, data: &[u8]) -> DcResult<usize>;
    fn ioctl(&mut self, request: u32, data: &mut [u8]) -> DcResult<()>;
    fn sleep(&mut self, milliseconds: u32) -> DcResult<()>;
    fn close(&mut self) -> DcResult<()>;
}

/// Factory side of the BLE subsystem.
pub trait BleManager {
    type Link: BleLink;

    /// Bring the subsystem up. Idempotent; safe to call before every open.
    fn initialize(&self);

    /// Allocate a fresh, unconnected link object. `None` means the
    /// subsystem is out of resources.
    fn create(&self) -> Option<Self::Link>;

    /// Connect the link to the device at `address`.
    fn connect(&self, link: &mut Self::Link, address: &str) -> bool;
}

/// Advertised GATT service UUIDs of supported dive computers, with the
/// hardware they belong to. Hosts can use these to narrow a scan.
pub const KNOWN_SERVICE_UUIDS: &[(&str, &str)] = &[
    ("0000fefb-0000-1000-8000-00805f9b34fb", "Heinrichs-Weikamp Telit/Stollmann"),
    ("2456e1b9-26e2-8f83-e744-f34f01e9d701", "Heinrichs-Weikamp U-Blox"),
    ("544e326b-5b72-c6b0-1c46-41c1bc448118", "Mares BlueLink Pro"),
    ("6e400001-b5a3-f393-e0a9-e50e24dcca9e", "Nordic Semi UART"),
    ("98ae7120-e62e-11e3-badd-0002a5d5c51b", "Suunto EON Steel/Core"),
    ("cb3c4555-d670-4670-bc20-b61dbc851e9a", "Pelagic i770R/i200C"),
    ("ca7b0001-f785-4c38-b599-c7c5fbadb034", "Pelagic i330R/DSX"),
    ("fdcdeaaa-295d-470e-bf15-04217b7aa0a0", "ScubaPro G2/G3"),
    ("fe25c237-0ece-443c-b0aa-e02033e7029d", "Shearwater Perdix/Teric"),
    ("0000fcef-0000-1000-8000-00805f9b34fb", "Divesoft Freedom"),
];
