//! Collaborators consumed by the registry and dispatcher
//!
//! Network discovery, the pairing store and the per-accessory control
//! channel are implemented outside this crate (`haa-discovery`, `haa-hap`).
//! Tests substitute in-memory fakes.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::device::{DeviceId, DiscoveredAccessory, PairedAccessory};
use crate::introspection::{Accessory, CharacteristicLocation};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Accessory not reachable: {0}")]
    Unreachable(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Accessory rejected request: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to start discovery: {0}")]
    Start(String),
    #[error("Discovery failed: {0}")]
    Browse(String),
}

#[derive(Error, Debug)]
pub enum PairingStoreError {
    #[error("Pairing store unreadable: {0}")]
    Unreadable(String),
}

/// Read/write access to the characteristics of one paired accessory
pub trait ControlChannel: Send + Sync {
    /// Fetch the full accessory/service/characteristic tree
    fn introspect(&self) -> impl Future<Output = Result<Vec<Accessory>, ChannelError>> + Send;

    /// Write a string value to a characteristic
    fn write(
        &self,
        location: CharacteristicLocation,
        value: &str,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Read the current value of a characteristic
    fn read(
        &self,
        location: CharacteristicLocation,
    ) -> impl Future<Output = Result<Option<String>, ChannelError>> + Send;
}

/// One bounded discovery pass over the local network
pub trait DiscoveryTransport: Send + Sync {
    fn discover(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<DiscoveredAccessory>, DiscoveryError>> + Send;
}

/// Persisted pairing material for previously paired accessories
pub trait PairingStore {
    type Channel: ControlChannel;

    fn load(
        &self,
        path: &Path,
    ) -> Result<HashMap<DeviceId, PairedAccessory<Self::Channel>>, PairingStoreError>;
}
