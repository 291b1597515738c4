/// Dive computer families with BLE-capable models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    SuuntoEonSteel,
    ShearwaterPetrel,
    HwOstc3,
    UwatecSmart,
    OceanicAtom2,
    PelagicI330R,
    MaresIconHd,
    DeepsixExcursion,
    DeepbluCosmiq,
    OceansS1,
    McleanExtreme,
    DivesoftFreedom,
    CressiGoa,
    DiveSystem,
}

/// Physical transport a descriptor (or stream) speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Serial,
    Usb,
    UsbHid,
    Irda,
    Bluetooth,
    Ble,
}

impl Transport {
    pub const fn bit(self) -> u32 {
        match self {
            Transport::Serial => 1 << 0,
            Transport::Usb => 1 << 1,
            Transport::UsbHid => 1 << 2,
            Transport::Irda => 1 << 3,
            Transport::Bluetooth => 1 << 4,
            Transport::Ble => 1 << 5,
        }
    }
}

/// Set of transports a descriptor supports, as a bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportSet(u32);

impl TransportSet {
    pub const fn empty() -> Self {
        TransportSet(0)
    }

    pub const fn with(self, transport: Transport) -> Self {
        TransportSet(self.0 | transport.bit())
    }

    pub const fn contains(self, transport: Transport) -> bool {
        self.0 & transport.bit() != 0
    }
}

/// Payload of a device-info event reported by the protocol engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfoEvent {
    pub model: u32,
    pub firmware: u32,
    pub serial: u32,
}

/// Payload of a download-progress event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub current: u32,
    pub maximum: u32,
}

/// Payload of a clock event (device time vs host time).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockEvent {
    pub devtime: u32,
    pub systime: i64,
}

/// Vendor/product pair produced by a naming-rule match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleMatch {
    pub vendor: String,
    pub product: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_set() {
        let set = TransportSet::empty()
            .with(Transport::Ble)
            .with(Transport::Usb);
        assert!(set.contains(Transport::Ble));
        assert!(set.contains(Transport::Usb));
        assert!(!set.contains(Transport::Serial));
        assert!(!TransportSet::empty().contains(Transport::Ble));
    }
}
