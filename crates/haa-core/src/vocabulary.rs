//! Firmware-version specific command vocabulary
//!
//! HAA accepts management commands written to its setup characteristic as
//! `<prefix><opcode>`. The prefix changed across firmware releases, so it is
//! resolved per device:
//! 1. the local table, consulted in declaration order, first threshold <= version wins
//! 2. the firmware header published for the version tag (`<product>_<version>`)
//! 3. the firmware header on the default branch
//! 4. [`DEFAULT_COMMAND_PREFIX`]
//!
//! Remote lookups never fail the resolution, they only fall through.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info, warn};

use crate::version::{Version, VersionError};

/// Prefix used when neither the table nor any remote source yields one
pub const DEFAULT_COMMAND_PREFIX: &str = "#HAA@trcmd";

/// Opcode appended to the prefix to request the configuration script.
/// The trailing space is required by the firmware tokenizer.
const READ_SCRIPT_OPCODE: &str = "01 ";

/// State-changing commands understood by the setup characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    StartUpdate,
    EnterSetup,
    Reboot,
    WifiReconnect,
}

impl ControlCommand {
    pub fn opcode(self) -> char {
        match self {
            Self::StartUpdate => '0',
            Self::EnterSetup => '1',
            Self::Reboot => '2',
            Self::WifiReconnect => '3',
        }
    }

    /// Control word for this command under `prefix`
    pub fn word(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.opcode())
    }
}

/// Base64 encoded control word that asks the device to expose its script
pub fn read_script_word(prefix: &str) -> String {
    BASE64.encode(format!("{}{}", prefix, READ_SCRIPT_OPCODE))
}

/// Extract `CUSTOM_HAA_COMMAND` from a firmware header file
pub fn parse_command_define(content: &str) -> Option<String> {
    static DEFINE: OnceLock<Regex> = OnceLock::new();
    let re = DEFINE.get_or_init(|| {
        Regex::new(r#"#define\s+CUSTOM_HAA_COMMAND\s+"([^"]+)""#).expect("valid regex")
    });
    re.captures(content).map(|c| c[1].to_string())
}

/// One row of the vocabulary table
#[derive(Debug, Clone)]
pub struct VocabularyEntry {
    pub min_version: Version,
    pub prefix: String,
}

/// Minimum-version thresholds mapped to command prefixes
///
/// Entries are NOT sorted. Lookup walks them in the order they were declared
/// and returns the first whose threshold the version satisfies.
#[derive(Debug, Clone, Default)]
pub struct VocabularyTable {
    entries: Vec<VocabularyEntry>,
}

impl VocabularyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, validating the threshold
    pub fn push(&mut self, min_version: &str, prefix: &str) -> Result<(), VersionError> {
        self.entries.push(VocabularyEntry {
            min_version: Version::parse(min_version)?,
            prefix: prefix.to_string(),
        });
        Ok(())
    }

    pub fn with_entry(mut self, min_version: &str, prefix: &str) -> Result<Self, VersionError> {
        self.push(min_version, prefix)?;
        Ok(self)
    }

    pub fn lookup(&self, version: &Version) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.min_version <= *version)
            .map(|e| e.prefix.as_str())
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Remote source of firmware header files, addressed by git tag or branch
pub trait VocabularySource: Send + Sync {
    /// Fetch the header content for `tag`; any failure yields `None`
    fn fetch(&self, tag: &str) -> impl Future<Output = Option<String>> + Send;
}

/// Resolves firmware versions to command prefixes
pub struct CommandVocabulary<S> {
    table: VocabularyTable,
    source: S,
    product: String,
    default_branch: String,
    default_prefix: String,
    /// Resolved prefixes for this run, keyed by raw version string
    cache: Mutex<HashMap<Option<String>, String>>,
}

impl<S: VocabularySource> CommandVocabulary<S> {
    pub fn new(table: VocabularyTable, source: S) -> Self {
        Self {
            table,
            source,
            product: "HAA".to_string(),
            default_branch: "master".to_string(),
            default_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_product(mut self, product: &str) -> Self {
        self.product = product.to_string();
        self
    }

    pub fn with_default_branch(mut self, branch: &str) -> Self {
        self.default_branch = branch.to_string();
        self
    }

    pub fn with_default_prefix(mut self, prefix: &str) -> Self {
        self.default_prefix = prefix.to_string();
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Tag under which the header for `version` is published
    pub fn version_tag(&self, version: &str) -> String {
        format!("{}_{}", self.product, version)
    }

    /// Resolve the command prefix for a firmware version
    ///
    /// `None` means the device did not report a version; the version-tagged
    /// fetch is skipped in that case.
    pub async fn resolve(&self, version: Option<&str>) -> String {
        let key = version.map(str::to_string);
        if let Some(prefix) = self.cached(&key) {
            return prefix;
        }

        let prefix = self.resolve_uncached(version).await;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, prefix.clone());
        }
        prefix
    }

    async fn resolve_uncached(&self, version: Option<&str>) -> String {
        if let Some(raw) = version {
            match Version::parse(raw) {
                Ok(parsed) => {
                    if let Some(prefix) = self.table.lookup(&parsed) {
                        debug!(version = %raw, prefix = %prefix, "Command prefix from table");
                        return prefix.to_string();
                    }
                }
                Err(e) => warn!(error = %e, "Cannot match firmware version against table"),
            }

            let tag = self.version_tag(raw);
            if let Some(prefix) = self.lookup_tag(&tag).await {
                return prefix;
            }
        }

        if let Some(prefix) = self.lookup_tag(&self.default_branch).await {
            return prefix;
        }

        info!(
            version = version.unwrap_or("unknown"),
            prefix = %self.default_prefix,
            "Using default command prefix"
        );
        self.default_prefix.clone()
    }

    /// Fetch and parse the header published under a single tag or branch
    pub async fn lookup_tag(&self, tag: &str) -> Option<String> {
        let Some(content) = self.source.fetch(tag).await else {
            debug!(tag = %tag, "No firmware header for tag");
            return None;
        };
        match parse_command_define(&content) {
            Some(prefix) => {
                debug!(tag = %tag, prefix = %prefix, "Command prefix from firmware header");
                Some(prefix)
            }
            None => {
                warn!(tag = %tag, "CUSTOM_HAA_COMMAND not found in firmware header");
                None
            }
        }
    }

    fn cached(&self, key: &Option<String>) -> Option<String> {
        self.cache.lock().ok()?.get(key).cloned()
    }
}
