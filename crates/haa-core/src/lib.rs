//! HAA Core - Device registry, command vocabulary and dispatch
//!
//! This crate provides the logic shared by every HAA management command:
//! - Firmware version ordering and version-specific command prefixes
//! - Typed accessory introspection and device records
//! - Registry joining discovered accessories with the pairing store
//! - Target selection and per-device command dispatch

pub mod device;
pub mod dispatch;
pub mod introspection;
pub mod record;
pub mod registry;
pub mod transport;
pub mod version;
pub mod vocabulary;

#[cfg(test)]
mod testing;

pub use device::{DeviceId, DiscoveredAccessory, PairedAccessory};
pub use dispatch::{CommandDispatcher, DispatchError, Operation, Outcome, OutcomeEntry, Selector};
pub use introspection::{Accessory, AccessoryDatabase, CharacteristicLocation};
pub use record::{DeviceRecord, RecordError};
pub use registry::{DeviceRegistry, HAA_MANUFACTURER};
pub use transport::{
    ChannelError, ControlChannel, DiscoveryError, DiscoveryTransport, PairingStore, PairingStoreError,
};
pub use version::{Version, VersionError};
pub use vocabulary::{CommandVocabulary, VocabularySource, VocabularyTable, DEFAULT_COMMAND_PREFIX};
