//! Snapshot of one online, paired HAA accessory

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

use crate::device::{DeviceId, DiscoveredAccessory};
use crate::introspection::{
    find_characteristic, find_in_accessory, Accessory, CharacteristicLocation, CHAR_FIRMWARE_REVISION,
    CHAR_HAA_ADVANCED_SETUP, CHAR_HAA_SETUP, CHAR_MANUFACTURER, CHAR_NAME, SERVICE_ACCESSORY_INFORMATION,
    SERVICE_HAA_SETUP,
};
use crate::transport::{ChannelError, ControlChannel};
use crate::vocabulary::{read_script_word, ControlCommand};

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Manufacturer mismatch: {primary:?} on primary accessory, {setup_host:?} on setup host")]
    IntegrityMismatch {
        primary: Option<String>,
        setup_host: Option<String>,
    },
    #[error("Accessory has no setup characteristic")]
    NoSetupCharacteristic,
    #[error("Accessory has no advanced setup characteristic")]
    NoAdvancedSetupCharacteristic,
    #[error("Script is not valid base64 UTF-8: {0}")]
    InvalidScript(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Identity, location and capability handles of an accessory
///
/// Borrows the control channel of its pairing; it owns no connection.
#[derive(Debug)]
pub struct DeviceRecord<'a, C> {
    pub id: DeviceId,
    pub display_name: String,
    pub ip: IpAddr,
    pub category: u16,
    /// Name reported by the Accessory Information service
    pub name: Option<String>,
    pub firmware_version: Option<String>,
    pub manufacturer: Option<String>,
    pub setup: Option<CharacteristicLocation>,
    pub advanced_setup: Option<CharacteristicLocation>,
    accessories: Vec<Accessory>,
    channel: &'a C,
}

fn info_value(accessories: &[Accessory], characteristic: &str) -> Option<String> {
    find_characteristic(accessories, SERVICE_ACCESSORY_INFORMATION, characteristic)
        .and_then(|f| f.characteristic.value_string())
}

impl<'a, C: ControlChannel> DeviceRecord<'a, C> {
    /// Build a record from discovery data and the accessory's introspection
    ///
    /// The manufacturer of the primary accessory must match the manufacturer
    /// of the accessory hosting the setup service.
    pub fn new(
        discovered: &DiscoveredAccessory,
        accessories: Vec<Accessory>,
        channel: &'a C,
    ) -> Result<Self, RecordError> {
        let firmware_version = info_value(&accessories, CHAR_FIRMWARE_REVISION);
        let name = info_value(&accessories, CHAR_NAME);
        let manufacturer = info_value(&accessories, CHAR_MANUFACTURER);

        let setup = find_characteristic(&accessories, SERVICE_HAA_SETUP, CHAR_HAA_SETUP).map(|f| f.location);
        let advanced_setup =
            find_characteristic(&accessories, SERVICE_HAA_SETUP, CHAR_HAA_ADVANCED_SETUP).map(|f| f.location);

        if let Some(host) = setup.and_then(|loc| accessories.iter().find(|a| a.aid == loc.aid)) {
            let host_manufacturer = find_in_accessory(host, SERVICE_ACCESSORY_INFORMATION, CHAR_MANUFACTURER)
                .and_then(|f| f.characteristic.value_string());
            if host_manufacturer != manufacturer {
                return Err(RecordError::IntegrityMismatch {
                    primary: manufacturer,
                    setup_host: host_manufacturer,
                });
            }
        }

        Ok(Self {
            id: discovered.id.clone(),
            display_name: discovered.display_name().to_string(),
            ip: discovered.ip,
            category: discovered.category,
            name,
            firmware_version,
            manufacturer,
            setup,
            advanced_setup,
            accessories,
            channel,
        })
    }

    pub fn accessories(&self) -> &[Accessory] {
        &self.accessories
    }

    /// Write a management command to the setup characteristic
    pub async fn send_command(&self, command: ControlCommand, prefix: &str) -> Result<(), RecordError> {
        let location = self.setup.ok_or(RecordError::NoSetupCharacteristic)?;
        let word = command.word(prefix);
        debug!(device = %self.id, location = %location, firmware = ?self.firmware_version, "Writing control word");
        self.channel.write(location, &word).await?;
        Ok(())
    }

    /// The characteristic whose absence prevents [`Self::read_script`], if any
    pub fn missing_script_capability(&self) -> Option<RecordError> {
        if self.setup.is_none() {
            Some(RecordError::NoSetupCharacteristic)
        } else if self.advanced_setup.is_none() {
            Some(RecordError::NoAdvancedSetupCharacteristic)
        } else {
            None
        }
    }

    /// Ask the device for its configuration script and read it back
    ///
    /// Returns `None` when the device answers with an empty value.
    pub async fn read_script(&self, prefix: &str) -> Result<Option<String>, RecordError> {
        if let Some(missing) = self.missing_script_capability() {
            return Err(missing);
        }
        let location = self.advanced_setup.ok_or(RecordError::NoAdvancedSetupCharacteristic)?;

        self.channel.write(location, &read_script_word(prefix)).await?;
        let Some(encoded) = self.channel.read(location).await? else {
            return Ok(None);
        };
        if encoded.is_empty() {
            return Ok(None);
        }

        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| RecordError::InvalidScript(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| RecordError::InvalidScript(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::tests::haa_database;
    use crate::introspection::AccessoryDatabase;
    use crate::testing::FakeChannel;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn discovered() -> DiscoveredAccessory {
        DiscoveredAccessory {
            id: DeviceId::new("AA:01"),
            instance_name: "Kitchen._hap._tcp.local.".to_string(),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            category: 8,
            manufacturer: "RavenSystem HAA".to_string(),
        }
    }

    /// Bridge whose setup service lives on a second accessory
    fn bridged_database(primary: &str, host: &str) -> Vec<Accessory> {
        let db: AccessoryDatabase = serde_json::from_value(json!({
            "accessories": [
                {"aid": 1, "services": [{"iid": 1, "type": "3E", "characteristics": [
                    {"iid": 3, "type": "21", "value": primary},
                    {"iid": 4, "type": "52", "value": "12.14.0"}
                ]}]},
                {"aid": 2, "services": [
                    {"iid": 1, "type": "3E", "characteristics": [{"iid": 3, "type": "21", "value": host}]},
                    {"iid": 9, "type": SERVICE_HAA_SETUP, "characteristics": [
                        {"iid": 10, "type": CHAR_HAA_SETUP, "value": ""}
                    ]}
                ]}
            ]
        }))
        .unwrap();
        db.accessories
    }

    #[test]
    fn test_record_extracts_capabilities() {
        let channel = FakeChannel::new(haa_database("RavenSystem HAA", "12.14.0"));
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();

        assert_eq!(record.id.as_str(), "aa:01");
        assert_eq!(record.display_name, "Kitchen");
        assert_eq!(record.name.as_deref(), Some("Kitchen Light"));
        assert_eq!(record.firmware_version.as_deref(), Some("12.14.0"));
        assert_eq!(record.manufacturer.as_deref(), Some("RavenSystem HAA"));
        assert_eq!(record.setup, Some(CharacteristicLocation { aid: 1, iid: 65010 }));
        assert_eq!(record.advanced_setup, Some(CharacteristicLocation { aid: 1, iid: 65012 }));
    }

    #[test]
    fn test_manufacturer_mismatch_fails_construction() {
        let channel = FakeChannel::new(bridged_database("RavenSystem HAA", "Spoofed Inc"));
        let result = DeviceRecord::new(&discovered(), channel.database(), &channel);
        assert!(matches!(result, Err(RecordError::IntegrityMismatch { .. })));
    }

    #[test]
    fn test_matching_bridge_manufacturer_is_accepted() {
        let channel = FakeChannel::new(bridged_database("RavenSystem HAA", "RavenSystem HAA"));
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();
        assert_eq!(record.setup, Some(CharacteristicLocation { aid: 2, iid: 10 }));
        assert_eq!(record.advanced_setup, None);
    }

    #[tokio::test]
    async fn test_send_command_writes_to_setup_characteristic() {
        let channel = FakeChannel::new(haa_database("RavenSystem HAA", "12.14.0"));
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();

        record.send_command(ControlCommand::Reboot, "pt").await.unwrap();
        assert_eq!(
            channel.writes(),
            vec![(CharacteristicLocation { aid: 1, iid: 65010 }, "pt2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_read_script_round_trip() {
        let channel = FakeChannel::new(haa_database("RavenSystem HAA", "12.14.0"))
            .with_read_value(Some(BASE64.encode("{\"c\":{\"l\":13}}")));
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();

        let script = record.read_script("pt").await.unwrap();
        assert_eq!(script.as_deref(), Some("{\"c\":{\"l\":13}}"));
        assert_eq!(
            channel.writes(),
            vec![(CharacteristicLocation { aid: 1, iid: 65012 }, "cHQwMSA=".to_string())]
        );
    }

    #[tokio::test]
    async fn test_read_script_empty_value() {
        let channel = FakeChannel::new(haa_database("RavenSystem HAA", "12.14.0")).with_read_value(None);
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();
        assert_eq!(record.read_script("pt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_capabilities() {
        let channel = FakeChannel::new(bridged_database("RavenSystem HAA", "RavenSystem HAA"));
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();
        assert!(matches!(
            record.read_script("pt").await,
            Err(RecordError::NoAdvancedSetupCharacteristic)
        ));

        let mut accessories = haa_database("RavenSystem HAA", "12.14.0");
        accessories[0].services.truncate(1);
        let channel = FakeChannel::new(accessories);
        let record = DeviceRecord::new(&discovered(), channel.database(), &channel).unwrap();
        assert!(matches!(
            record.send_command(ControlCommand::EnterSetup, "pt").await,
            Err(RecordError::NoSetupCharacteristic)
        ));
        assert!(matches!(
            record.missing_script_capability(),
            Some(RecordError::NoSetupCharacteristic)
        ));
        assert!(matches!(
            record.read_script("pt").await,
            Err(RecordError::NoSetupCharacteristic)
        ));
        assert!(channel.writes().is_empty());
    }
}
