//! Target selection and command dispatch
//!
//! A selector resolves to zero or more online, paired accessories. Each
//! target is then introspected, turned into a [`DeviceRecord`] and sent the
//! requested operation, one at a time and in resolution order. Failures are
//! recorded per device and never stop the batch. Nothing is retried: a
//! command like "start update" must not be sent twice.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::device::{DeviceId, DiscoveredAccessory, PairedAccessory};
use crate::introspection::dump;
use crate::record::{DeviceRecord, RecordError};
use crate::registry::DeviceRegistry;
use crate::transport::ControlChannel;
use crate::vocabulary::{CommandVocabulary, ControlCommand, VocabularySource};

/// Selector matching every online, paired accessory
pub const ALL_DEVICES_WILDCARD: &str = "*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("\"{0}\" is not a device found online")]
    TargetNotFound(String),
    #[error("{id} ({name}) is an online device but NOT paired")]
    TargetNotPaired { id: DeviceId, name: String },
}

/// Which accessories a command is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Identity(DeviceId),
    /// Legacy selection by display name
    Name(String),
}

impl Selector {
    pub fn parse(raw: &str, by_name: bool) -> Self {
        match raw.trim() {
            ALL_DEVICES_WILDCARD => Self::All,
            name if by_name => Self::Name(name.to_string()),
            id => Self::Identity(DeviceId::new(id)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "{}", ALL_DEVICES_WILDCARD),
            Self::Identity(id) => write!(f, "{}", id),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reboot,
    EnterSetup,
    StartUpdate,
    WifiReconnect,
    ReadScript,
    /// Report the firmware version; writes nothing
    Version,
    /// Render the accessory database; writes nothing
    Dump,
}

impl Operation {
    fn command(self) -> Option<ControlCommand> {
        match self {
            Self::Reboot => Some(ControlCommand::Reboot),
            Self::EnterSetup => Some(ControlCommand::EnterSetup),
            Self::StartUpdate => Some(ControlCommand::StartUpdate),
            Self::WifiReconnect => Some(ControlCommand::WifiReconnect),
            Self::ReadScript | Self::Version | Self::Dump => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Reboot => "REBOOT",
            Self::EnterSetup => "SETUP",
            Self::StartUpdate => "UPDATE",
            Self::WifiReconnect => "WIFI RECONNECTION",
            Self::ReadScript => "SCRIPT",
            Self::Version => "VERSION",
            Self::Dump => "DUMP",
        }
    }
}

/// Result of an operation on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Operation done; carries the version, dump or script when there is one
    Success(Option<String>),
    Unreachable(String),
    IntegrityMismatch(String),
    /// The accessory lacks the characteristic the operation needs
    Unsupported(String),
    /// The write or read was attempted once and failed
    CommandFailed(String),
    TargetNotFound,
    TargetNotPaired,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => write!(f, "success"),
            Self::Unreachable(e) => write!(f, "unreachable: {}", e),
            Self::IntegrityMismatch(e) => write!(f, "integrity mismatch: {}", e),
            Self::Unsupported(e) => write!(f, "unsupported: {}", e),
            Self::CommandFailed(e) => write!(f, "command failed: {}", e),
            Self::TargetNotFound => write!(f, "not found online"),
            Self::TargetNotPaired => write!(f, "online but not paired"),
        }
    }
}

/// One line of the outcome log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeEntry {
    /// Pairing ID, or the raw selector when nothing matched it
    pub target: String,
    pub name: Option<String>,
    pub outcome: Outcome,
}

pub struct CommandDispatcher<'a, C, S> {
    registry: &'a DeviceRegistry<C>,
    vocabulary: &'a CommandVocabulary<S>,
    cancelled: Arc<AtomicBool>,
}

impl<'a, C: ControlChannel, S: VocabularySource> CommandDispatcher<'a, C, S> {
    pub fn new(registry: &'a DeviceRegistry<C>, vocabulary: &'a CommandVocabulary<S>) -> Self {
        Self {
            registry,
            vocabulary,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that, once set, stops dispatch before the next target
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Resolve a selector to its targets, in dispatch order
    pub fn resolve(
        &self,
        selector: &Selector,
    ) -> Result<Vec<(&'a DiscoveredAccessory, &'a PairedAccessory<C>)>, DispatchError> {
        let registry = self.registry;
        let target = match selector {
            Selector::All => {
                return Ok(registry
                    .online_and_paired()
                    .into_iter()
                    .filter_map(|(id, paired)| registry.find_by_identity(&id).map(|d| (d, paired)))
                    .collect());
            }
            Selector::Identity(id) => registry.find_by_identity(id),
            Selector::Name(name) => registry.find_by_name(name),
        };

        let discovered = target.ok_or_else(|| DispatchError::TargetNotFound(selector.to_string()))?;
        let paired = registry
            .paired()
            .get(&discovered.id)
            .ok_or_else(|| DispatchError::TargetNotPaired {
                id: discovered.id.clone(),
                name: discovered.display_name().to_string(),
            })?;
        Ok(vec![(discovered, paired)])
    }

    /// Resolve the selector and run `operation` on every target
    pub async fn resolve_and_execute(&self, selector: &Selector, operation: Operation) -> Vec<OutcomeEntry> {
        let targets = match self.resolve(selector) {
            Ok(targets) => targets,
            Err(e) => {
                error!("{}", e);
                let entry = match e {
                    DispatchError::TargetNotFound(raw) => OutcomeEntry {
                        target: raw,
                        name: None,
                        outcome: Outcome::TargetNotFound,
                    },
                    DispatchError::TargetNotPaired { id, name } => OutcomeEntry {
                        target: id.to_string(),
                        name: Some(name),
                        outcome: Outcome::TargetNotPaired,
                    },
                };
                return vec![entry];
            }
        };

        info!("{} Devices Match", targets.len());

        let mut log = Vec::with_capacity(targets.len());
        for (discovered, paired) in targets {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!(processed = log.len(), "Dispatch cancelled, skipping remaining devices");
                break;
            }
            let outcome = self.execute(discovered, paired, operation).await;
            log.push(OutcomeEntry {
                target: discovered.id.to_string(),
                name: Some(discovered.display_name().to_string()),
                outcome,
            });
        }
        log
    }

    async fn execute(
        &self,
        discovered: &DiscoveredAccessory,
        paired: &PairedAccessory<C>,
        operation: Operation,
    ) -> Outcome {
        let accessories = match paired.channel.introspect().await {
            Ok(accessories) => accessories,
            Err(e) => {
                error!(device = %discovered.id, error = %e, "{} NOT online", discovered.id);
                return Outcome::Unreachable(e.to_string());
            }
        };

        let record = match DeviceRecord::new(discovered, accessories, &paired.channel) {
            Ok(record) => record,
            Err(e) => {
                error!(device = %discovered.id, error = %e, "Refusing to handle device");
                return Outcome::IntegrityMismatch(e.to_string());
            }
        };

        info!(
            "{} Device: {}({})        Id: {:20} Ip: {:20}",
            operation.label(),
            record.id,
            record.display_name,
            record.id.as_str(),
            record.ip.to_string()
        );

        match operation {
            Operation::Version => {
                let version = record.firmware_version.clone().unwrap_or_else(|| "unknown".to_string());
                info!("Device: {}({})       Version: {:20}", record.id, record.display_name, version);
                Outcome::Success(Some(version))
            }
            Operation::Dump => Outcome::Success(Some(dump(record.accessories()))),
            Operation::ReadScript => {
                if let Some(missing) = record.missing_script_capability() {
                    return Outcome::Unsupported(missing.to_string());
                }
                let prefix = self.vocabulary.resolve(record.firmware_version.as_deref()).await;
                match record.read_script(&prefix).await {
                    Ok(script) => Outcome::Success(script),
                    Err(e) => command_failed(&record.id, e),
                }
            }
            op => {
                let Some(command) = op.command() else {
                    return Outcome::Unsupported(format!("{} has no control word", op.label()));
                };
                if record.setup.is_none() {
                    return Outcome::Unsupported(RecordError::NoSetupCharacteristic.to_string());
                }
                let prefix = self.vocabulary.resolve(record.firmware_version.as_deref()).await;
                match record.send_command(command, &prefix).await {
                    Ok(()) => Outcome::Success(None),
                    Err(e) => command_failed(&record.id, e),
                }
            }
        }
    }
}

fn command_failed(id: &DeviceId, e: RecordError) -> Outcome {
    error!(device = %id, error = %e, "Command failed");
    Outcome::CommandFailed(e.to_string())
}
