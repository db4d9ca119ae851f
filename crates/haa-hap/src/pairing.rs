//! Pairing file loading
//!
//! The pairing file is a JSON object mapping an alias to the pairing
//! material of one accessory, as written by HAP controller libraries.
//! Only IP pairings can be addressed; BLE pairings are skipped.

use haa_core::{DeviceId, PairedAccessory, PairingStore, PairingStoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::channel::{HttpChannel, DEFAULT_REQUEST_TIMEOUT};

/// Pairing material for one accessory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingEntry {
    #[serde(rename = "AccessoryPairingID")]
    pub accessory_pairing_id: String,
    #[serde(rename = "AccessoryIP", default)]
    pub accessory_ip: Option<String>,
    #[serde(rename = "AccessoryPort", default)]
    pub accessory_port: Option<u16>,
    #[serde(rename = "Connection", default = "default_connection")]
    pub connection: String,
    #[serde(rename = "AccessoryLTPK", default)]
    pub accessory_ltpk: Option<String>,
    #[serde(rename = "iOSPairingId", default)]
    pub controller_pairing_id: Option<String>,
    #[serde(rename = "iOSDeviceLTSK", default)]
    pub controller_ltsk: Option<String>,
    #[serde(rename = "iOSDeviceLTPK", default)]
    pub controller_ltpk: Option<String>,
}

fn default_connection() -> String {
    "IP".to_string()
}

/// Parse the pairing file content into entries keyed by alias
pub fn parse_pairing_file(content: &str) -> Result<HashMap<String, PairingEntry>, PairingStoreError> {
    serde_json::from_str(content).map_err(|e| PairingStoreError::Unreadable(e.to_string()))
}

/// Pairing store backed by a JSON pairing file
pub struct JsonPairingStore {
    client: reqwest::Client,
    timeout: Duration,
}

impl JsonPairingStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn channel_for(&self, alias: &str, entry: &PairingEntry) -> Option<HttpChannel> {
        if !entry.connection.eq_ignore_ascii_case("IP") {
            debug!(alias = %alias, connection = %entry.connection, "Skipping non-IP pairing");
            return None;
        }

        let ip = entry.accessory_ip.as_deref().and_then(|ip| ip.parse::<IpAddr>().ok());
        match (ip, entry.accessory_port) {
            (Some(ip), Some(port)) => Some(HttpChannel::new(self.client.clone(), ip, port, self.timeout)),
            _ => {
                warn!(alias = %alias, "Pairing has no usable accessory address, skipping");
                None
            }
        }
    }
}

impl Default for JsonPairingStore {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl PairingStore for JsonPairingStore {
    type Channel = HttpChannel;

    fn load(&self, path: &Path) -> Result<HashMap<DeviceId, PairedAccessory<HttpChannel>>, PairingStoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PairingStoreError::Unreadable(format!("{}: {}", path.display(), e)))?;
        let entries = parse_pairing_file(&content)?;

        let mut paired = HashMap::new();
        for (alias, entry) in &entries {
            let Some(channel) = self.channel_for(alias, entry) else {
                continue;
            };
            let id = DeviceId::new(&entry.accessory_pairing_id);
            debug!(alias = %alias, id = %id, url = %channel.base_url(), "Loaded pairing");
            paired.insert(id.clone(), PairedAccessory { id, channel });
        }
        Ok(paired)
    }
}
