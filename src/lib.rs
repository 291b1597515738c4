pub mod ble;
pub mod ble_mock;
pub mod descriptor;
pub mod engine;
pub mod engine_mock;
pub mod error;
pub mod models;
pub mod session;
pub mod stream;

uniffi::include_scaffolding!("divelink");

pub use ble::{BleLink, BleManager, KNOWN_SERVICE_UUIDS};
pub use descriptor::{
    format_display_name, formatted_device_name, identify_from_name, match_naming_rule,
    normalize_device_type, resolve_by_family_model, resolve_by_name, Descriptor,
    DescriptorCatalog, MatchKind, NamingRule, NAME_RULES,
};
pub use engine::{
    Device, DeviceEvent, EventHandler, FingerprintSink, FingerprintStore, ProtocolEngine,
};
pub use error::{DcError, DcResult};
pub use models::{
    ClockEvent, DeviceInfoEvent, Family, ProgressEvent, RuleMatch, Transport, TransportSet,
};
pub use session::{
    create_parser, format_serial, open_session, open_session_with_fallback, DeviceSession,
};
pub use stream::{open_ble_connection, BleStream, Stream};
