//! HAA Discovery - Network discovery for HAA accessories
//!
//! This crate provides:
//! - mDNS browsing of `_hap._tcp` and `_hap._udp` services
//! - Local interface detection
//! - Setup-mode probing of the local subnet

pub mod mdns;
pub mod probe;

pub use mdns::{MdnsDiscovery, HAP_SERVICE_TYPES};
pub use probe::{is_in_setup_mode, local_ipv4, scan_setup_mode, subnet_hosts, SETUP_PORT};
