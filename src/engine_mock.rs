//! Mock protocol engine and descriptor catalog for tests.
//!
//! Context and device handles count their acquire/release transitions so
//! tests can assert balanced teardown after every induced failure point.
//! The sample catalog mirrors a slice of a real catalog: every BLE entry
//! carries a vendor name filter, the way the real catalog's entries do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::descriptor::{Descriptor, DescriptorCatalog};
use crate::engine::{
    Device, DeviceEvent, EventHandler, FingerprintSink, ProtocolEngine, EVENT_CLOCK,
    EVENT_DEVINFO, EVENT_PROGRESS,
};
use crate::error::{DcError, DcResult};
use crate::models::{Family, Transport, TransportSet};
use crate::stream::Stream;

const BLE: TransportSet = TransportSet::empty().with(Transport::Ble);

fn shearwater_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble
        && ["Predator", "Petrel", "Perdix", "Teric", "Peregrine", "NERD", "Tern"]
            .iter()
            .any(|p| name.contains(p))
}

fn suunto_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble
        && (name.contains("EON Steel") || name.contains("EON Core") || name.contains("Suunto D5"))
}

fn uwatec_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble
        && ["G2", "G3", "HUD", "Aladin", "Luna"].iter().any(|p| name.contains(p))
}

fn mares_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble
        && ["Genius", "Sirius", "Quad", "Puck"].iter().any(|p| name.contains(p))
}

fn cressi_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble
        && (name.starts_with("CARESIO")
            || name.starts_with("GOA")
            || name.contains("Leonardo")
            || name.contains("Donatello")
            || name.contains("Michelangelo")
            || name.contains("Neon")
            || name.contains("Nepto"))
}

fn hw_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble && name.contains("OSTC")
}

fn deepblu_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble && name.to_ascii_lowercase().contains("cosmiq")
}

fn oceans_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble && name == "S1"
}

fn ratio_filter(transport: Transport, name: &str) -> bool {
    transport == Transport::Ble
        && (name.starts_with("DS") || name.starts_with("IX5M") || name.starts_with("RATIO-"))
}

fn entry(
    vendor: &'static str,
    product: &'static str,
    family: Family,
    model: u32,
    filter: Option<crate::descriptor::NameFilter>,
) -> Descriptor {
    Descriptor {
        vendor,
        product,
        family,
        model,
        transports: BLE,
        filter,
    }
}

/// In-memory catalog, iterated like the engine's.
#[derive(Clone, Debug, Default)]
pub struct MockCatalog {
    descriptors: Vec<Descriptor>,
    fail_iter: bool,
}

impl MockCatalog {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        MockCatalog {
            descriptors,
            fail_iter: false,
        }
    }

    /// A representative slice of supported BLE dive computers.
    pub fn sample() -> Self {
        Self::new(vec![
            entry("Shearwater", "Predator", Family::ShearwaterPetrel, 2, Some(shearwater_filter)),
            entry("Shearwater", "Petrel 2", Family::ShearwaterPetrel, 3, Some(shearwater_filter)),
            entry("Shearwater", "NERD", Family::ShearwaterPetrel, 4, Some(shearwater_filter)),
            entry("Shearwater", "Perdix", Family::ShearwaterPetrel, 5, Some(shearwater_filter)),
            entry("Shearwater", "NERD 2", Family::ShearwaterPetrel, 7, Some(shearwater_filter)),
            entry("Shearwater", "Teric", Family::ShearwaterPetrel, 8, Some(shearwater_filter)),
            entry("Shearwater", "Peregrine", Family::ShearwaterPetrel, 9, Some(shearwater_filter)),
            entry("Shearwater", "Petrel 3", Family::ShearwaterPetrel, 10, Some(shearwater_filter)),
            entry("Shearwater", "Perdix 2", Family::ShearwaterPetrel, 11, Some(shearwater_filter)),
            entry("Shearwater", "Tern", Family::ShearwaterPetrel, 12, Some(shearwater_filter)),
            entry("Suunto", "EON Steel", Family::SuuntoEonSteel, 0, Some(suunto_filter)),
            entry("Suunto", "EON Core", Family::SuuntoEonSteel, 1, Some(suunto_filter)),
            entry("Suunto", "D5", Family::SuuntoEonSteel, 2, Some(suunto_filter)),
            entry("Scubapro", "G2", Family::UwatecSmart, 0x32, Some(uwatec_filter)),
            entry("Scubapro", "Aladin Sport Matrix", Family::UwatecSmart, 0x17, Some(uwatec_filter)),
            entry("Mares", "Genius", Family::MaresIconHd, 0x1C, Some(mares_filter)),
            entry("Cressi", "Cartesio", Family::CressiGoa, 2, Some(cressi_filter)),
            entry("Cressi", "Goa", Family::CressiGoa, 1, Some(cressi_filter)),
            entry("Cressi", "Leonardo 2.0", Family::CressiGoa, 5, Some(cressi_filter)),
            entry("Heinrichs Weikamp", "OSTC 2", Family::HwOstc3, 0x11, Some(hw_filter)),
            entry("Heinrichs Weikamp", "OSTC Plus", Family::HwOstc3, 0x13, Some(hw_filter)),
            entry("Deepblu", "Cosmiq+", Family::DeepbluCosmiq, 0, Some(deepblu_filter)),
            entry("Oceans", "S1", Family::OceansS1, 0, Some(oceans_filter)),
            entry("Ratio", "iX3M 2021 GPS Easy", Family::DiveSystem, 0x22, Some(ratio_filter)),
        ])
    }

    /// Same catalog minus one product, for exercising rule-table gaps.
    pub fn without_product(mut self, product: &str) -> Self {
        self.descriptors.retain(|d| d.product != product);
        self
    }

    pub fn with_iter_failure(mut self) -> Self {
        self.fail_iter = true;
        self
    }
}

impl DescriptorCatalog for MockCatalog {
    fn descriptors(&self) -> DcResult<Box<dyn Iterator<Item = Descriptor> + '_>> {
        if self.fail_iter {
            return Err(DcError::Engine("descriptor iterator failure".to_string()));
        }
        Ok(Box::new(self.descriptors.iter().cloned()))
    }
}

#[derive(Debug, Default)]
struct EngineCounterInner {
    contexts_created: AtomicUsize,
    contexts_freed: AtomicUsize,
    devices_opened: AtomicUsize,
    devices_closed: AtomicUsize,
}

/// Shared bookkeeping for engine-side resources.
#[derive(Clone, Debug, Default)]
pub struct MockEngineCounters {
    inner: Arc<EngineCounterInner>,
}

impl MockEngineCounters {
    pub fn contexts_created(&self) -> usize {
        self.inner.contexts_created.load(Ordering::SeqCst)
    }

    pub fn contexts_freed(&self) -> usize {
        self.inner.contexts_freed.load(Ordering::SeqCst)
    }

    pub fn devices_opened(&self) -> usize {
        self.inner.devices_opened.load(Ordering::SeqCst)
    }

    pub fn devices_closed(&self) -> usize {
        self.inner.devices_closed.load(Ordering::SeqCst)
    }
}

/// Engine context. Freed when dropped.
#[derive(Debug)]
pub struct MockContext {
    counters: MockEngineCounters,
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.counters.inner.contexts_freed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Open device handle. Owns the stream it was opened over and closes it
/// exactly once, on device close or drop.
pub struct MockDevice {
    counters: MockEngineCounters,
    stream: Option<Box<dyn Stream>>,
    handler: Option<EventHandler>,
    mask: u32,
    fail_events: bool,
    fail_fingerprint: bool,
    pub fingerprint: Option<Vec<u8>>,
}

impl MockDevice {
    /// Deliver an event the way the engine would: synchronously, with this
    /// device as the fingerprint sink, honoring the subscription mask.
    pub fn emit(&mut self, event: &DeviceEvent) {
        let wanted = match event {
            DeviceEvent::DeviceInfo(_) => EVENT_DEVINFO,
            DeviceEvent::Progress(_) => EVENT_PROGRESS,
            DeviceEvent::Clock(_) => EVENT_CLOCK,
            DeviceEvent::Other => 0,
        };
        if wanted != 0 && self.mask & wanted == 0 {
            return;
        }
        if let Some(mut handler) = self.handler.take() {
            handler(self, event);
            self.handler = Some(handler);
        }
    }

    fn shutdown(&mut self) -> DcResult<()> {
        if let Some(stream) = self.stream.take() {
            self.counters.inner.devices_closed.fetch_add(1, Ordering::SeqCst);
            return stream.close();
        }
        Ok(())
    }
}

impl FingerprintSink for MockDevice {
    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> DcResult<()> {
        if self.fail_fingerprint {
            return Err(DcError::Engine("fingerprint rejected".to_string()));
        }
        self.fingerprint = Some(fingerprint.to_vec());
        Ok(())
    }
}

impl Device for MockDevice {
    fn set_events(&mut self, mask: u32, handler: EventHandler) -> DcResult<()> {
        if self.fail_events {
            return Err(DcError::Engine("event subscription failure".to_string()));
        }
        self.mask = mask;
        self.handler = Some(handler);
        Ok(())
    }

    fn close(mut self) -> DcResult<()> {
        self.shutdown()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Parser stub: records what it was built from.
#[derive(Debug)]
pub struct MockParser {
    pub device_type: String,
    pub data: Vec<u8>,
}

/// Mock engine with injectable failure points.
#[derive(Clone, Debug, Default)]
pub struct MockEngine {
    catalog: MockCatalog,
    counters: MockEngineCounters,
    fail_context: bool,
    fail_open: bool,
    fail_events: bool,
    fail_fingerprint: bool,
    fail_parser: bool,
}

impl MockEngine {
    pub fn new(catalog: MockCatalog) -> Self {
        MockEngine {
            catalog,
            ..Default::default()
        }
    }

    pub fn sample() -> Self {
        Self::new(MockCatalog::sample())
    }

    pub fn with_context_failure(mut self) -> Self {
        self.fail_context = true;
        self
    }

    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_events_failure(mut self) -> Self {
        self.fail_events = true;
        self
    }

    pub fn with_fingerprint_failure(mut self) -> Self {
        self.fail_fingerprint = true;
        self
    }

    pub fn with_parser_failure(mut self) -> Self {
        self.fail_parser = true;
        self
    }

    pub fn counters(&self) -> MockEngineCounters {
        self.counters.clone()
    }
}

impl DescriptorCatalog for MockEngine {
    fn descriptors(&self) -> DcResult<Box<dyn Iterator<Item = Descriptor> + '_>> {
        self.catalog.descriptors()
    }
}

impl ProtocolEngine for MockEngine {
    type Context = MockContext;
    type Device = MockDevice;
    type Parser = MockParser;

    fn new_context(&self) -> DcResult<MockContext> {
        if self.fail_context {
            return Err(DcError::NoMemory);
        }
        self.counters.inner.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockContext {
            counters: self.counters.clone(),
        })
    }

    fn open_device(
        &self,
        _context: &MockContext,
        _descriptor: &Descriptor,
        stream: Box<dyn Stream>,
    ) -> DcResult<MockDevice> {
        if self.fail_open {
            // The engine owns the stream from here on and closes it on its
            // own failure paths too.
            let _ = stream.close();
            return Err(DcError::Engine("device open failure".to_string()));
        }
        self.counters.inner.devices_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockDevice {
            counters: self.counters.clone(),
            stream: Some(stream),
            handler: None,
            mask: 0,
            fail_events: self.fail_events,
            fail_fingerprint: self.fail_fingerprint,
            fingerprint: None,
        })
    }

    fn new_parser(
        &self,
        _context: &MockContext,
        descriptor: &Descriptor,
        data: &[u8],
    ) -> DcResult<MockParser> {
        if self.fail_parser {
            return Err(DcError::Engine("parser construction failure".to_string()));
        }
        Ok(MockParser {
            device_type: descriptor.display_name(),
            data: data.to_vec(),
        })
    }
}
