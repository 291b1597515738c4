//! Device session: the full lifecycle of one dive computer connection.
//!
//! A session bundles the engine context, the resolved descriptor, the open
//! device handle (which owns the stream), and the event state the engine
//! fills in while the caller drives a download. Construction is linear
//! with unwind-on-failure: each acquisition is a local that drops, in
//! reverse order, if a later step fails.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::ble::BleManager;
use crate::descriptor::{identify_from_name, resolve_by_family_model, Descriptor};
use crate::engine::{
    Device, DeviceEvent, EventHandler, FingerprintStore, ProtocolEngine, EVENT_CLOCK,
    EVENT_DEVINFO, EVENT_PROGRESS,
};
use crate::error::{DcError, DcResult};
use crate::models::{DeviceInfoEvent, Family, ProgressEvent};
use crate::stream::open_ble_connection;

/// Serial number formatted the way fingerprints are keyed: 8 hex digits,
/// zero padded.
pub fn format_serial(serial: u32) -> String {
    format!("{serial:08x}")
}

/// Event payloads captured since the device was opened.
#[derive(Clone, Debug, Default)]
struct EventState {
    devinfo: Option<DeviceInfoEvent>,
    progress: Option<ProgressEvent>,
    fingerprint: Option<Vec<u8>>,
}

/// One open dive computer connection.
///
/// Field order matters for drop: the device (and with it the stream) must
/// go down before the context it was opened under.
pub struct DeviceSession<E: ProtocolEngine> {
    device: E::Device,
    context: E::Context,
    descriptor: Descriptor,
    events: Arc<Mutex<EventState>>,
    display_name: String,
}

impl<E: ProtocolEngine> std::fmt::Debug for DeviceSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("display_name", &self.display_name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

fn make_event_handler(
    events: Arc<Mutex<EventState>>,
    store: Option<Arc<dyn FingerprintStore>>,
    device_type: String,
) -> EventHandler {
    Box::new(move |device, event| match event {
        DeviceEvent::DeviceInfo(info) => {
            let mut state = events.lock().unwrap();
            state.devinfo = Some(*info);
            if let Some(store) = &store {
                let serial = format_serial(info.serial);
                if let Some(fingerprint) = store.lookup(&device_type, &serial) {
                    if !fingerprint.is_empty() {
                        // The fingerprint is retained even if the device
                        // refuses it, so the caller can still inspect it.
                        if let Err(err) = device.set_fingerprint(&fingerprint) {
                            warn!(%err, "device rejected stored fingerprint");
                        }
                        state.fingerprint = Some(fingerprint);
                    }
                }
            }
        }
        DeviceEvent::Progress(progress) => {
            events.lock().unwrap().progress = Some(*progress);
        }
        _ => {}
    })
}

/// Open a full session to the device at `address`, identified by a known
/// (family, model) pair.
///
/// Steps, in order: engine context, descriptor resolution, BLE connection,
/// device open, event subscription. A failure at any step releases
/// everything acquired before it and propagates the originating error.
pub fn open_session<M, E>(
    manager: &M,
    engine: &E,
    address: &str,
    family: Family,
    model: u32,
    fingerprint_store: Option<Arc<dyn FingerprintStore>>,
) -> DcResult<DeviceSession<E>>
where
    M: BleManager,
    M::Link: 'static,
    E: ProtocolEngine,
{
    if address.is_empty() {
        return Err(DcError::InvalidArgument("device address is empty".to_string()));
    }

    let context = engine.new_context()?;

    let descriptor = resolve_by_family_model(engine, family, model)?;

    let stream = open_ble_connection(manager, address)?;

    let mut device = engine.open_device(&context, &descriptor, stream)?;

    let events = Arc::new(Mutex::new(EventState::default()));
    let display_name = descriptor.display_name();
    let handler = make_event_handler(
        Arc::clone(&events),
        fingerprint_store,
        display_name.clone(),
    );
    device.set_events(EVENT_DEVINFO | EVENT_PROGRESS | EVENT_CLOCK, handler)?;

    Ok(DeviceSession {
        device,
        context,
        descriptor,
        events,
        display_name,
    })
}

/// Open a session using a previously stored (family, model) pair when one
/// is available, falling back to identification by advertised name.
///
/// A stored pair with model 0 counts as absent. Failures of the stored
/// attempt are logged, not surfaced; only the final attempt's error
/// reaches the caller.
pub fn open_session_with_fallback<M, E>(
    manager: &M,
    engine: &E,
    name: &str,
    address: &str,
    stored: Option<(Family, u32)>,
    fingerprint_store: Option<Arc<dyn FingerprintStore>>,
) -> DcResult<DeviceSession<E>>
where
    M: BleManager,
    M::Link: 'static,
    E: ProtocolEngine,
{
    if let Some((family, model)) = stored {
        if model != 0 {
            match open_session(
                manager,
                engine,
                address,
                family,
                model,
                fingerprint_store.clone(),
            ) {
                Ok(session) => return Ok(session),
                Err(err) => {
                    debug!(%err, ?family, model, "stored configuration failed, identifying by name");
                }
            }
        }
    }

    let (family, model) = identify_from_name(engine, name)?;
    open_session(manager, engine, address, family, model, fingerprint_store)
}

/// Build a parser for raw dive data from a device known by (family, model).
pub fn create_parser<E>(
    engine: &E,
    context: &E::Context,
    family: Family,
    model: u32,
    data: &[u8],
) -> DcResult<E::Parser>
where
    E: ProtocolEngine,
{
    let descriptor = resolve_by_family_model(engine, family, model)?;
    engine.new_parser(context, &descriptor, data)
}

impl<E: ProtocolEngine> DeviceSession<E> {
    /// Descriptor the session was opened with.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// "Vendor Product" string for the connected device.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Engine context the session was opened under, for parser creation.
    pub fn context(&self) -> &E::Context {
        &self.context
    }

    pub fn device(&self) -> &E::Device {
        &self.device
    }

    /// Mutable device handle; downloads are driven through this.
    pub fn device_mut(&mut self) -> &mut E::Device {
        &mut self.device
    }

    /// Last device-info event, if one has been reported.
    pub fn device_info(&self) -> Option<DeviceInfoEvent> {
        self.events.lock().unwrap().devinfo
    }

    /// Last progress event, if one has been reported.
    pub fn progress(&self) -> Option<ProgressEvent> {
        self.events.lock().unwrap().progress
    }

    /// Fingerprint retrieved from the store on the last device-info event.
    pub fn fingerprint(&self) -> Option<Vec<u8>> {
        self.events.lock().unwrap().fingerprint.clone()
    }

    /// Close the session: device (and stream) first, then the context.
    pub fn close(self) -> DcResult<()> {
        self.device.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble_mock::MockBleManager;
    use crate::engine_mock::{MockCatalog, MockEngine};
    use crate::models::ClockEvent;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    struct StaticStore {
        fingerprint: Vec<u8>,
        queries: Mutex<Vec<(String, String)>>,
    }

    impl StaticStore {
        fn new(fingerprint: Vec<u8>) -> Self {
            StaticStore {
                fingerprint,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    impl FingerprintStore for StaticStore {
        fn lookup(&self, device_type: &str, serial: &str) -> Option<Vec<u8>> {
            self.queries
                .lock()
                .unwrap()
                .push((device_type.to_string(), serial.to_string()));
            if self.fingerprint.is_empty() {
                None
            } else {
                Some(self.fingerprint.clone())
            }
        }
    }

    fn manager() -> MockBleManager {
        MockBleManager::new().with_device(ADDR)
    }

    #[test]
    fn test_format_serial_zero_pads() {
        assert_eq!(format_serial(0xABCD), "0000abcd");
        assert_eq!(format_serial(0), "00000000");
        assert_eq!(format_serial(0xDEADBEEF), "deadbeef");
    }

    #[test]
    fn test_open_session_success() {
        let manager = manager();
        let engine = MockEngine::sample();
        let session =
            open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None).unwrap();

        assert_eq!(session.display_name(), "Shearwater Petrel 2");
        assert_eq!(session.descriptor().model, 3);
        assert!(session.device_info().is_none());
        assert!(session.progress().is_none());
        assert!(session.fingerprint().is_none());
        assert_eq!(engine.counters().devices_opened(), 1);
    }

    #[test]
    fn test_open_session_empty_address() {
        let engine = MockEngine::sample();
        let err = open_session(&manager(), &engine, "", Family::ShearwaterPetrel, 3, None)
            .unwrap_err();
        assert!(matches!(err, DcError::InvalidArgument(_)));
        assert_eq!(engine.counters().contexts_created(), 0);
    }

    #[test]
    fn test_open_session_unsupported_model_unwinds_context() {
        let manager = manager();
        let engine = MockEngine::sample();
        let err = open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 999, None)
            .unwrap_err();
        assert_eq!(err, DcError::Unsupported);

        // Descriptor resolution precedes the connection: no link was ever
        // created, and the context has already been freed.
        assert_eq!(manager.counters().created(), 0);
        assert_eq!(engine.counters().contexts_created(), 1);
        assert_eq!(engine.counters().contexts_freed(), 1);
    }

    #[test]
    fn test_open_session_connect_failure_unwinds() {
        let manager = MockBleManager::new(); // refuses every connect
        let engine = MockEngine::sample();
        let err = open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None)
            .unwrap_err();
        assert!(matches!(err, DcError::Io(_)));
        assert_eq!(manager.counters().created(), 1);
        assert_eq!(manager.counters().released(), 1);
        assert_eq!(engine.counters().contexts_freed(), 1);
        assert_eq!(engine.counters().devices_opened(), 0);
    }

    #[test]
    fn test_open_session_device_open_failure_unwinds() {
        let manager = manager();
        let engine = MockEngine::sample().with_open_failure();
        let err = open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None)
            .unwrap_err();
        assert!(matches!(err, DcError::Engine(_)));

        // Stream and context are gone; no device handle was ever acquired,
        // so nothing tries to close one.
        assert_eq!(manager.counters().created(), 1);
        assert_eq!(manager.counters().closed(), 1);
        assert_eq!(manager.counters().released(), 1);
        assert_eq!(engine.counters().contexts_freed(), 1);
        assert_eq!(engine.counters().devices_opened(), 0);
        assert_eq!(engine.counters().devices_closed(), 0);
    }

    #[test]
    fn test_open_session_events_failure_unwinds_device() {
        let manager = manager();
        let engine = MockEngine::sample().with_events_failure();
        let err = open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None)
            .unwrap_err();
        assert!(matches!(err, DcError::Engine(_)));
        assert_eq!(engine.counters().devices_opened(), 1);
        assert_eq!(engine.counters().devices_closed(), 1);
        assert_eq!(manager.counters().released(), 1);
        assert_eq!(engine.counters().contexts_freed(), 1);
    }

    #[test]
    fn test_close_releases_everything_once() {
        let manager = manager();
        let engine = MockEngine::sample();
        let session =
            open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None).unwrap();
        session.close().unwrap();

        assert_eq!(engine.counters().devices_closed(), 1);
        assert_eq!(engine.counters().contexts_freed(), 1);
        assert_eq!(manager.counters().closed(), 1);
        assert_eq!(manager.counters().released(), 1);
    }

    #[test]
    fn test_devinfo_event_triggers_fingerprint_lookup() {
        let manager = manager();
        let engine = MockEngine::sample();
        let store = Arc::new(StaticStore::new(vec![0xDE, 0xAD]));
        let mut session = open_session(
            &manager,
            &engine,
            ADDR,
            Family::ShearwaterPetrel,
            3,
            Some(store.clone()),
        )
        .unwrap();

        let info = DeviceInfoEvent {
            model: 3,
            firmware: 0x0100,
            serial: 0xABCD,
        };
        session.device_mut().emit(&DeviceEvent::DeviceInfo(info));

        assert_eq!(session.device_info(), Some(info));
        assert_eq!(session.fingerprint(), Some(vec![0xDE, 0xAD]));
        // The fingerprint was pushed down to the device as well.
        assert_eq!(session.device().fingerprint, Some(vec![0xDE, 0xAD]));

        let queries = store.queries.lock().unwrap();
        assert_eq!(
            queries.as_slice(),
            &[("Shearwater Petrel 2".to_string(), "0000abcd".to_string())]
        );
    }

    #[test]
    fn test_devinfo_without_store_only_records_event() {
        let manager = manager();
        let engine = MockEngine::sample();
        let mut session =
            open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None).unwrap();

        let info = DeviceInfoEvent {
            model: 3,
            firmware: 1,
            serial: 42,
        };
        session.device_mut().emit(&DeviceEvent::DeviceInfo(info));
        assert_eq!(session.device_info(), Some(info));
        assert!(session.fingerprint().is_none());
    }

    #[test]
    fn test_store_miss_leaves_no_fingerprint() {
        let manager = manager();
        let engine = MockEngine::sample();
        let store = Arc::new(StaticStore::new(Vec::new()));
        let mut session = open_session(
            &manager,
            &engine,
            ADDR,
            Family::ShearwaterPetrel,
            3,
            Some(store),
        )
        .unwrap();

        session.device_mut().emit(&DeviceEvent::DeviceInfo(DeviceInfoEvent::default()));
        assert!(session.fingerprint().is_none());
        assert!(session.device().fingerprint.is_none());
    }

    #[test]
    fn test_fingerprint_retained_even_if_device_rejects_it() {
        let manager = manager();
        let engine = MockEngine::sample().with_fingerprint_failure();
        let store = Arc::new(StaticStore::new(vec![0x01]));
        let mut session = open_session(
            &manager,
            &engine,
            ADDR,
            Family::ShearwaterPetrel,
            3,
            Some(store),
        )
        .unwrap();

        session.device_mut().emit(&DeviceEvent::DeviceInfo(DeviceInfoEvent::default()));
        assert_eq!(session.fingerprint(), Some(vec![0x01]));
        assert!(session.device().fingerprint.is_none());
    }

    #[test]
    fn test_progress_event_is_polled() {
        let manager = manager();
        let engine = MockEngine::sample();
        let mut session =
            open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None).unwrap();

        let progress = ProgressEvent {
            current: 10,
            maximum: 100,
        };
        session.device_mut().emit(&DeviceEvent::Progress(progress));
        assert_eq!(session.progress(), Some(progress));

        let progress = ProgressEvent {
            current: 55,
            maximum: 100,
        };
        session.device_mut().emit(&DeviceEvent::Progress(progress));
        assert_eq!(session.progress(), Some(progress));
    }

    #[test]
    fn test_other_events_are_ignored() {
        let manager = manager();
        let engine = MockEngine::sample();
        let mut session =
            open_session(&manager, &engine, ADDR, Family::ShearwaterPetrel, 3, None).unwrap();

        session.device_mut().emit(&DeviceEvent::Clock(ClockEvent {
            devtime: 123,
            systime: 456,
        }));
        session.device_mut().emit(&DeviceEvent::Other);
        assert!(session.device_info().is_none());
        assert!(session.progress().is_none());
    }

    #[test]
    fn test_fallback_uses_stored_pair_when_it_works() {
        let manager = manager();
        let engine = MockEngine::sample();
        let session = open_session_with_fallback(
            &manager,
            &engine,
            "Perdix",
            ADDR,
            Some((Family::ShearwaterPetrel, 8)),
            None,
        )
        .unwrap();
        // The stored pair (Teric) wins; the name is never consulted.
        assert_eq!(session.display_name(), "Shearwater Teric");
    }

    #[test]
    fn test_fallback_identifies_by_name_when_stored_pair_fails() {
        let manager = manager();
        let engine = MockEngine::sample();
        let session = open_session_with_fallback(
            &manager,
            &engine,
            "Shearwater Petrel 2",
            ADDR,
            Some((Family::SuuntoEonSteel, 999)),
            None,
        )
        .unwrap();
        // The session descriptor comes from the name, not the stored pair.
        assert_eq!(session.descriptor().product, "Petrel 2");
        assert_eq!(session.descriptor().family, Family::ShearwaterPetrel);
    }

    #[test]
    fn test_fallback_treats_model_zero_as_absent() {
        let manager = manager();
        let engine = MockEngine::sample();
        let session = open_session_with_fallback(
            &manager,
            &engine,
            "Teric",
            ADDR,
            Some((Family::ShearwaterPetrel, 0)),
            None,
        )
        .unwrap();
        assert_eq!(session.display_name(), "Shearwater Teric");
    }

    #[test]
    fn test_fallback_reports_only_final_error() {
        let manager = manager();
        let engine = MockEngine::sample();
        let err = open_session_with_fallback(
            &manager,
            &engine,
            "Mystery Gadget",
            ADDR,
            Some((Family::SuuntoEonSteel, 999)),
            None,
        )
        .unwrap_err();
        // The stored-pair miss is not surfaced; the name resolution's
        // error is.
        assert_eq!(err, DcError::Unsupported);
    }

    #[test]
    fn test_create_parser() {
        let engine = MockEngine::sample();
        let context = engine.new_context().unwrap();
        let parser =
            create_parser(&engine, &context, Family::ShearwaterPetrel, 3, &[1, 2, 3]).unwrap();
        assert_eq!(parser.device_type, "Shearwater Petrel 2");
        assert_eq!(parser.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_create_parser_unsupported_model() {
        let engine = MockEngine::sample();
        let context = engine.new_context().unwrap();
        let err = create_parser(&engine, &context, Family::ShearwaterPetrel, 999, &[])
            .unwrap_err();
        assert_eq!(err, DcError::Unsupported);
    }

    #[test]
    fn test_create_parser_engine_failure_passes_through() {
        let engine = MockEngine::sample().with_parser_failure();
        let context = engine.new_context().unwrap();
        let err =
            create_parser(&engine, &context, Family::ShearwaterPetrel, 3, &[]).unwrap_err();
        assert!(matches!(err, DcError::Engine(_)));
    }

    #[test]
    fn test_fallback_with_empty_catalog_gap() {
        // Catalog missing the stored model entirely, name resolving
        // through a later rule: exercises the full two-stage path.
        let manager = manager();
        let engine = MockEngine::new(MockCatalog::sample().without_product("NERD 2"));
        let session = open_session_with_fallback(
            &manager,
            &engine,
            "NERD 2",
            ADDR,
            None,
            None,
        )
        .unwrap();
        assert_eq!(session.descriptor().product, "NERD");
    }
}
