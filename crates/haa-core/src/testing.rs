//! In-memory collaborators for unit tests

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{DeviceId, DiscoveredAccessory, PairedAccessory};
use crate::introspection::{Accessory, CharacteristicLocation};
use crate::transport::{
    ChannelError, ControlChannel, DiscoveryError, DiscoveryTransport, PairingStore, PairingStoreError,
};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeChannel {
    database: Vec<Accessory>,
    read_value: Option<String>,
    unreachable: bool,
    reject_writes: bool,
    writes: Arc<Mutex<Vec<(CharacteristicLocation, String)>>>,
    /// Raised once a write has landed, like an operator abort mid-batch
    cancel_on_write: Option<Arc<AtomicBool>>,
}

impl FakeChannel {
    pub(crate) fn new(database: Vec<Accessory>) -> Self {
        Self {
            database,
            ..Self::default()
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_read_value(mut self, value: Option<String>) -> Self {
        self.read_value = value;
        self
    }

    pub(crate) fn rejecting_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    pub(crate) fn cancelling(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_on_write = Some(flag);
        self
    }

    pub(crate) fn database(&self) -> Vec<Accessory> {
        self.database.clone()
    }

    pub(crate) fn writes(&self) -> Vec<(CharacteristicLocation, String)> {
        self.writes.lock().unwrap().clone()
    }
}

impl ControlChannel for FakeChannel {
    async fn introspect(&self) -> Result<Vec<Accessory>, ChannelError> {
        if self.unreachable {
            return Err(ChannelError::Unreachable("connection refused".to_string()));
        }
        Ok(self.database.clone())
    }

    async fn write(&self, location: CharacteristicLocation, value: &str) -> Result<(), ChannelError> {
        if self.reject_writes {
            return Err(ChannelError::Rejected(format!("write to {} refused", location)));
        }
        self.writes.lock().unwrap().push((location, value.to_string()));
        if let Some(flag) = &self.cancel_on_write {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn read(&self, _location: CharacteristicLocation) -> Result<Option<String>, ChannelError> {
        Ok(self.read_value.clone())
    }
}

pub(crate) struct FakeDiscovery(pub Vec<DiscoveredAccessory>);

impl DiscoveryTransport for FakeDiscovery {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredAccessory>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

pub(crate) struct FakeStore(pub Option<Vec<(&'static str, FakeChannel)>>);

impl PairingStore for FakeStore {
    type Channel = FakeChannel;

    fn load(&self, path: &Path) -> Result<HashMap<DeviceId, PairedAccessory<FakeChannel>>, PairingStoreError> {
        let Some(entries) = &self.0 else {
            return Err(PairingStoreError::Unreadable(format!("{}: not JSON", path.display())));
        };
        Ok(entries
            .iter()
            .map(|(id, channel)| {
                let id = DeviceId::new(id);
                (
                    id.clone(),
                    PairedAccessory {
                        id,
                        channel: channel.clone(),
                    },
                )
            })
            .collect())
    }
}

pub(crate) fn accessory(id: &str, name: &str, model: &str) -> DiscoveredAccessory {
    DiscoveredAccessory {
        id: DeviceId::new(id),
        instance_name: format!("{}._hap._tcp.local.", name),
        ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
        category: 8,
        manufacturer: model.to_string(),
    }
}
