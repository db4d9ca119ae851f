//! Setup-mode probing
//!
//! An accessory in setup mode serves its configuration page on
//! [`SETUP_PORT`]. A successful TCP connect is taken as "in setup mode".

use anyhow::{anyhow, Result};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info};

/// Port of the setup-mode web server
pub const SETUP_PORT: u16 = 4567;

/// Check whether the accessory at `ip` accepts connections on the setup port
pub async fn is_in_setup_mode(ip: IpAddr, port: u16, probe_timeout: Duration) -> bool {
    let addr = SocketAddr::new(ip, port);
    matches!(timeout(probe_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// First non-loopback IPv4 address of this host
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let interfaces = NetworkInterface::show().map_err(|e| anyhow!("Failed to list interfaces: {}", e))?;
    interfaces
        .iter()
        .flat_map(|iface| iface.addr.iter())
        .find_map(|addr| match addr {
            Addr::V4(v4) if !v4.ip.is_loopback() && !v4.ip.is_link_local() => Some(v4.ip),
            _ => None,
        })
        .ok_or_else(|| anyhow!("No IPv4 interface found"))
}

/// Host addresses `.1` to `.254` of the /24 containing `ip`
pub fn subnet_hosts(ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = ip.octets();
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}

/// Probe every host in parallel, at most `concurrency` at a time
///
/// Returns the hosts in setup mode, in ascending address order.
pub async fn scan_setup_mode(
    hosts: &[Ipv4Addr],
    port: u16,
    probe_timeout: Duration,
    concurrency: usize,
) -> Vec<Ipv4Addr> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for &host in hosts {
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            if is_in_setup_mode(IpAddr::V4(host), port, probe_timeout).await {
                Some(host)
            } else {
                None
            }
        });
    }

    let mut in_setup = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok(Some(ip)) = result {
            info!(ip = %ip, "Found device in setup mode");
            in_setup.push(ip);
        }
    }
    in_setup.sort();

    debug!("Probed {} hosts, {} in setup mode", hosts.len(), in_setup.len());
    in_setup
}
