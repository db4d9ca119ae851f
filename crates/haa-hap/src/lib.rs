//! HAA HAP - Control channel and pairing store for HAP accessories
//!
//! This crate speaks the HAP JSON resource model (`/accessories`,
//! `/characteristics`) to paired accessories and loads the pairing file
//! written by the controller that paired them.

pub mod channel;
pub mod pairing;

pub use channel::{HttpChannel, DEFAULT_REQUEST_TIMEOUT};
pub use pairing::{JsonPairingStore, PairingEntry};
