//! Typed accessory database returned by a control channel
//!
//! The HAP `/accessories` resource is a tree of accessories, each exposing
//! services, each exposing characteristics. Every lookup done on an
//! accessory goes through [`find_characteristic`].

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Apple base UUID suffix used to expand short HAP type identifiers
const HAP_BASE_UUID_SUFFIX: &str = "-0000-1000-8000-0026BB765291";

/// Accessory Information service
pub const SERVICE_ACCESSORY_INFORMATION: &str = "0000003E-0000-1000-8000-0026BB765291";
/// Name characteristic
pub const CHAR_NAME: &str = "00000023-0000-1000-8000-0026BB765291";
/// Manufacturer characteristic
pub const CHAR_MANUFACTURER: &str = "00000021-0000-1000-8000-0026BB765291";
/// Firmware revision characteristic
pub const CHAR_FIRMWARE_REVISION: &str = "00000052-0000-1000-8000-0026BB765291";

/// HAA custom setup service
pub const SERVICE_HAA_SETUP: &str = "F0000100-0218-2017-81BF-AF2B7C833922";
/// Setup characteristic; management commands are written here
pub const CHAR_HAA_SETUP: &str = "F0000101-0218-2017-81BF-AF2B7C833922";
/// Advanced setup characteristic; used to read the configuration script
pub const CHAR_HAA_ADVANCED_SETUP: &str = "F0000103-0218-2017-81BF-AF2B7C833922";

/// Location of a characteristic on a device: (accessory id, instance id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicLocation {
    pub aid: u64,
    pub iid: u64,
}

impl std::fmt::Display for CharacteristicLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.aid, self.iid)
    }
}

/// Body of the `/accessories` resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessoryDatabase {
    pub accessories: Vec<Accessory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accessory {
    pub aid: u64,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub iid: u64,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Characteristic {
    pub iid: u64,
    #[serde(rename = "type")]
    pub characteristic_type: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub perms: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Characteristic {
    /// Value rendered as text (strings unquoted, other JSON values as-is)
    pub fn value_string(&self) -> Option<String> {
        match &self.value {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Expand a short HAP type ("3E") to its full uppercase UUID form
pub fn normalize_uuid(uuid: &str) -> String {
    let uuid = uuid.trim();
    if uuid.len() <= 8 && !uuid.is_empty() && uuid.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("{:0>8}{}", uuid.to_ascii_uppercase(), HAP_BASE_UUID_SUFFIX)
    } else {
        uuid.to_ascii_uppercase()
    }
}

fn type_matches(actual: &str, wanted: &str) -> bool {
    normalize_uuid(actual) == normalize_uuid(wanted)
}

/// A characteristic found by [`find_characteristic`], with its location
#[derive(Debug, Clone, Copy)]
pub struct Found<'a> {
    pub location: CharacteristicLocation,
    pub characteristic: &'a Characteristic,
}

/// Find the first characteristic of `characteristic_type` inside a service of
/// `service_type`, scanning accessories in order
pub fn find_characteristic<'a>(
    accessories: &'a [Accessory],
    service_type: &str,
    characteristic_type: &str,
) -> Option<Found<'a>> {
    accessories
        .iter()
        .find_map(|a| find_in_accessory(a, service_type, characteristic_type))
}

/// Same as [`find_characteristic`], restricted to one accessory
pub fn find_in_accessory<'a>(
    accessory: &'a Accessory,
    service_type: &str,
    characteristic_type: &str,
) -> Option<Found<'a>> {
    accessory
        .services
        .iter()
        .filter(|s| type_matches(&s.service_type, service_type))
        .flat_map(|s| s.characteristics.iter())
        .find(|c| type_matches(&c.characteristic_type, characteristic_type))
        .map(|c| Found {
            location: CharacteristicLocation {
                aid: accessory.aid,
                iid: c.iid,
            },
            characteristic: c,
        })
}

/// Render the whole database as a human readable listing
pub fn dump(accessories: &[Accessory]) -> String {
    let mut out = String::new();
    for accessory in accessories {
        for service in &accessory.services {
            let _ = writeln!(out, "{}.{}: #{}#", accessory.aid, service.iid, service.service_type);
            for c in &service.characteristics {
                let _ = writeln!(
                    out,
                    "  {}.{}: ({}) #{}# [{}]",
                    accessory.aid,
                    c.iid,
                    c.description.as_deref().unwrap_or(""),
                    c.characteristic_type,
                    c.perms.join(",")
                );
                let _ = writeln!(out, "    Value: {}", c.value_string().unwrap_or_default());
            }
        }
    }
    out
}
