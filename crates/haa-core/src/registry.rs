//! Registry of discovered and paired accessories
//!
//! Discovery yields what is reachable right now; the pairing store yields
//! what this controller may talk to. Commands only ever target the
//! intersection of the two.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::device::{display_name, DeviceId, DiscoveredAccessory, PairedAccessory};
use crate::transport::{DiscoveryError, DiscoveryTransport, PairingStore, PairingStoreError};

/// Prefix of the `md` TXT record advertised by HAA firmware
pub const HAA_MANUFACTURER: &str = "RavenSystem HAA";

/// Paired accessories that are also online, in discovery order
pub fn online_and_paired<'a, C>(
    discovered: &[DiscoveredAccessory],
    paired: &'a HashMap<DeviceId, PairedAccessory<C>>,
) -> IndexMap<DeviceId, &'a PairedAccessory<C>> {
    discovered
        .iter()
        .filter_map(|d| paired.get(&d.id).map(|p| (d.id.clone(), p)))
        .collect()
}

pub struct DeviceRegistry<C> {
    manufacturer_tag: String,
    discovered: Vec<DiscoveredAccessory>,
    paired: HashMap<DeviceId, PairedAccessory<C>>,
}

impl<C> DeviceRegistry<C> {
    pub fn new(manufacturer_tag: &str) -> Self {
        Self {
            manufacturer_tag: manufacturer_tag.to_string(),
            discovered: Vec::new(),
            paired: HashMap::new(),
        }
    }

    /// Run one discovery pass, keeping only accessories from our fleet
    ///
    /// Replaces the result of any previous pass. Returns the number kept.
    pub async fn discover<T: DiscoveryTransport>(
        &mut self,
        transport: &T,
        timeout: Duration,
    ) -> Result<usize, DiscoveryError> {
        let found = transport.discover(timeout).await?;
        let total = found.len();

        let mut kept: Vec<DiscoveredAccessory> = Vec::new();
        for accessory in found {
            if !accessory.manufacturer.starts_with(&self.manufacturer_tag) {
                debug!(id = %accessory.id, model = %accessory.manufacturer, "Ignoring foreign accessory");
                continue;
            }
            // The same accessory may be announced more than once per pass
            if kept.iter().any(|k| k.id == accessory.id) {
                continue;
            }
            kept.push(accessory);
        }

        info!(total = total, matching = kept.len(), "Discovery pass complete");
        self.discovered = kept;
        Ok(self.discovered.len())
    }

    /// Load the pairing store. A failure here leaves no devices addressable.
    pub fn load_paired<S>(&mut self, store: &S, path: &Path) -> Result<usize, PairingStoreError>
    where
        S: PairingStore<Channel = C>,
    {
        self.paired = store.load(path)?;
        info!(path = %path.display(), paired = self.paired.len(), "Loaded pairing store");
        Ok(self.paired.len())
    }

    pub fn discovered(&self) -> &[DiscoveredAccessory] {
        &self.discovered
    }

    pub fn paired(&self) -> &HashMap<DeviceId, PairedAccessory<C>> {
        &self.paired
    }

    pub fn online_and_paired(&self) -> IndexMap<DeviceId, &PairedAccessory<C>> {
        online_and_paired(&self.discovered, &self.paired)
    }

    pub fn find_by_identity(&self, id: &DeviceId) -> Option<&DiscoveredAccessory> {
        self.discovered.iter().find(|d| &d.id == id)
    }

    /// Look up by display name; with duplicates the first discovered wins
    pub fn find_by_name(&self, name: &str) -> Option<&DiscoveredAccessory> {
        let name = display_name(name);
        self.discovered.iter().find(|d| d.display_name() == name)
    }
}
