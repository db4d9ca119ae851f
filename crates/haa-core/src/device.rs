//! Accessory identity and discovery types

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Suffix of the mDNS instance name that is not part of the display name
const HAP_SERVICE_SUFFIX: &str = "._hap";

/// Pairing identifier of an accessory, unique across the fleet
///
/// HAP pairing IDs look like `AA:BB:CC:DD:EE:FF`. Discovery and the pairing
/// store don't agree on letter case, so IDs are kept lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: &str) -> Self {
        Self(id.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An accessory seen on the network during one discovery pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredAccessory {
    pub id: DeviceId,
    /// mDNS instance name, e.g. `Kitchen Light._hap._tcp.local.`
    pub instance_name: String,
    pub ip: IpAddr,
    /// HAP category identifier (`ci` TXT record)
    pub category: u16,
    /// Model string advertised by the accessory (`md` TXT record)
    pub manufacturer: String,
}

impl DiscoveredAccessory {
    /// Instance name without the protocol suffix
    pub fn display_name(&self) -> &str {
        display_name(&self.instance_name)
    }

    pub fn category_name(&self) -> &'static str {
        category_name(self.category)
    }
}

/// Strip the `._hap...` suffix from an mDNS instance name
pub fn display_name(instance_name: &str) -> &str {
    instance_name
        .split(HAP_SERVICE_SUFFIX)
        .next()
        .unwrap_or(instance_name)
}

/// Human readable name of a HAP accessory category
pub fn category_name(category: u16) -> &'static str {
    match category {
        1 => "Other",
        2 => "Bridge",
        3 => "Fan",
        4 => "Garage",
        5 => "LightBulb",
        6 => "Door Lock",
        7 => "Outlet",
        8 => "Switch",
        9 => "Thermostat",
        10 => "Sensor",
        11 => "Security System",
        12 => "Door",
        13 => "Window",
        14 => "Window Covering",
        15 => "Programmable Switch",
        16 => "Range Extender",
        17 => "Ip Camera",
        18 => "Video DoorBell",
        19 => "Air Purifier",
        20 => "Heater",
        21 => "Air Conditioner",
        22 => "Humidifier",
        23 => "Dehumidifier",
        24 => "Apple Tv",
        25 => "Homepod",
        26 => "Speaker",
        27 => "Airport",
        28 => "Sprinkler",
        29 => "Faucet",
        30 => "Shower Head",
        31 => "Television",
        32 => "Remote",
        33 => "Router",
        _ => "Unknown Category",
    }
}

/// An accessory loaded from the pairing store
#[derive(Debug, Clone)]
pub struct PairedAccessory<C> {
    pub id: DeviceId,
    pub channel: C,
}
