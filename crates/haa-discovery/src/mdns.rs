//! mDNS discovery of HAP accessories

use haa_core::{DeviceId, DiscoveredAccessory, DiscoveryError, DiscoveryTransport};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Service types advertised by HAP accessories over TCP and over UDP
pub const HAP_SERVICE_TYPES: [&str; 2] = ["_hap._tcp.local.", "_hap._udp.local."];

/// TXT record keys from the HAP bonjour advertisement
mod txt {
    pub const ID: &str = "id";
    pub const MODEL: &str = "md";
    pub const CATEGORY: &str = "ci";
}

/// Browses the network for HAP accessories for a bounded time
pub struct MdnsDiscovery {
    service_types: Vec<String>,
}

impl MdnsDiscovery {
    pub fn new<I, S>(service_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service_types: service_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn service_types(&self) -> &[String] {
        &self.service_types
    }
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new(HAP_SERVICE_TYPES)
    }
}

/// Build an accessory from a resolved advertisement
///
/// Advertisements without a pairing id or an address can't be addressed and
/// are dropped. IPv4 addresses are preferred.
pub fn accessory_from_service(
    fullname: &str,
    addresses: &HashSet<IpAddr>,
    id: Option<&str>,
    model: Option<&str>,
    category: Option<&str>,
) -> Option<DiscoveredAccessory> {
    let id = id.filter(|id| !id.is_empty())?;
    let ip = addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    Some(DiscoveredAccessory {
        id: DeviceId::new(id),
        instance_name: fullname.to_string(),
        ip,
        category: category.and_then(|c| c.trim().parse().ok()).unwrap_or(0),
        manufacturer: model.unwrap_or_default().to_string(),
    })
}

/// Map one browse event to an accessory, if it is a usable resolution
fn resolved_accessory(event: ServiceEvent) -> Option<DiscoveredAccessory> {
    let ServiceEvent::ServiceResolved(info) = event else {
        return None;
    };
    trace!(name = %info.get_fullname(), "Resolved service");
    let accessory = accessory_from_service(
        info.get_fullname(),
        info.get_addresses(),
        info.get_property_val_str(txt::ID),
        info.get_property_val_str(txt::MODEL),
        info.get_property_val_str(txt::CATEGORY),
    );
    if accessory.is_none() {
        debug!(name = %info.get_fullname(), "Advertisement missing id or address");
    }
    accessory
}

impl DiscoveryTransport for MdnsDiscovery {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredAccessory>, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Start(e.to_string()))?;
        let deadline = Instant::now() + timeout;

        // All browses share one deadline; results are merged in service-type order
        let mut browses: Vec<JoinHandle<Vec<DiscoveredAccessory>>> = Vec::new();
        for service_type in &self.service_types {
            let receiver = daemon
                .browse(service_type)
                .map_err(|e| DiscoveryError::Browse(format!("{}: {}", service_type, e)))?;
            debug!(service = %service_type, timeout_secs = timeout.as_secs(), "Browsing for accessories");
            browses.push(tokio::spawn(async move {
                let mut found = Vec::new();
                loop {
                    match timeout_at(deadline, receiver.recv_async()).await {
                        Ok(Ok(event)) => found.extend(resolved_accessory(event)),
                        Ok(Err(e)) => {
                            warn!(error = %e, "mDNS browse channel closed early");
                            break;
                        }
                        Err(_) => break,
                    }
                }
                found
            }));
        }

        let mut found = Vec::new();
        for browse in browses {
            match browse.await {
                Ok(batch) => found.extend(batch),
                Err(e) => warn!(error = %e, "mDNS browse task failed"),
            }
        }

        for service_type in &self.service_types {
            if let Err(e) = daemon.stop_browse(service_type) {
                debug!(service = %service_type, error = %e, "Failed to stop mDNS browse");
            }
        }
        if let Err(e) = daemon.shutdown() {
            debug!(error = %e, "Failed to shut down mDNS daemon");
        }

        debug!(found = found.len(), "mDNS browse finished");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_accessory_from_service() {
        let addresses: HashSet<IpAddr> = [
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 30)),
        ]
        .into_iter()
        .collect();

        let accessory = accessory_from_service(
            "Garage Door._hap._tcp.local.",
            &addresses,
            Some("AA:BB:CC:00:11:22"),
            Some("RavenSystem HAA ESP8266"),
            Some("4"),
        )
        .unwrap();

        assert_eq!(accessory.id.as_str(), "aa:bb:cc:00:11:22");
        assert_eq!(accessory.display_name(), "Garage Door");
        assert_eq!(accessory.ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 30)));
        assert_eq!(accessory.category_name(), "Garage");
        assert_eq!(accessory.manufacturer, "RavenSystem HAA ESP8266");
    }

    #[test]
    fn test_default_browses_tcp_and_udp() {
        let discovery = MdnsDiscovery::default();
        assert_eq!(discovery.service_types(), ["_hap._tcp.local.", "_hap._udp.local."]);

        let custom = MdnsDiscovery::new(vec!["_hap._tcp.local.".to_string()]);
        assert_eq!(custom.service_types().len(), 1);
    }

    #[test]
    fn test_unaddressable_advertisements_are_dropped() {
        let addresses: HashSet<IpAddr> = [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))].into_iter().collect();
        assert!(accessory_from_service("x._hap._tcp.local.", &addresses, None, None, None).is_none());
        assert!(accessory_from_service("x._hap._tcp.local.", &HashSet::new(), Some("aa"), None, None).is_none());

        let bare = accessory_from_service("x._hap._tcp.local.", &addresses, Some("aa"), None, Some("?")).unwrap();
        assert_eq!(bare.category, 0);
        assert_eq!(bare.manufacturer, "");
    }
}
