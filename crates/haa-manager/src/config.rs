//! Configuration loading and validation

use anyhow::{Context, Result};
use haa_core::vocabulary::VocabularyTable;
use haa_core::{DEFAULT_COMMAND_PREFIX, HAA_MANUFACTURER};
use haa_discovery::{HAP_SERVICE_TYPES, SETUP_PORT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How long to listen for mDNS announcements
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Model prefix identifying HAA accessories
    #[serde(default = "default_manufacturer_tag")]
    pub manufacturer_tag: String,
    /// mDNS service types browsed together for one pass
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            manufacturer_tag: default_manufacturer_tag(),
            service_types: default_service_types(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_manufacturer_tag() -> String {
    HAA_MANUFACTURER.to_string()
}

fn default_service_types() -> Vec<String> {
    HAP_SERVICE_TYPES.iter().map(|t| t.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyConfig {
    /// Product name used to build version tags (`<product>_<version>`)
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_prefix")]
    pub default_prefix: String,
    /// Consulted in the order written, first satisfied threshold wins
    #[serde(default)]
    pub table: Vec<VocabularyEntryConfig>,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            product: default_product(),
            default_branch: default_branch(),
            default_prefix: default_prefix(),
            table: Vec::new(),
        }
    }
}

fn default_product() -> String {
    "HAA".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_prefix() -> String {
    DEFAULT_COMMAND_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyEntryConfig {
    pub min_version: String,
    pub prefix: String,
}

impl VocabularyConfig {
    /// Build the lookup table, rejecting malformed thresholds
    pub fn to_table(&self) -> Result<VocabularyTable> {
        let mut table = VocabularyTable::new();
        for entry in &self.table {
            table
                .push(&entry.min_version, &entry.prefix)
                .with_context(|| format!("Invalid vocabulary threshold for prefix {:?}", entry.prefix))?;
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    /// Firmware header defining CUSTOM_HAA_COMMAND
    #[serde(default = "default_header_path")]
    pub header_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            repo: default_repo(),
            header_path: default_header_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_owner() -> String {
    "RavenSystem".to_string()
}

fn default_repo() -> String {
    "esp-homekit-devices".to_string()
}

fn default_header_path() -> String {
    "HAA/HAA_Main/main/header.h".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default = "default_setup_port")]
    pub port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Maximum parallel probes during a subnet scan
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            port: default_setup_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_setup_port() -> u16 {
    SETUP_PORT
}

fn default_probe_timeout_ms() -> u64 {
    800
}

fn default_concurrency() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Timeout of each request to an accessory
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.setup.probe_timeout_ms)
    }
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
    config.vocabulary.to_table()?;
    Ok(config)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = parse_config(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haa_core::Version;

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.discovery.timeout_secs, 10);
        assert_eq!(config.discovery.manufacturer_tag, "RavenSystem HAA");
        assert_eq!(config.discovery.service_types, vec!["_hap._tcp.local.", "_hap._udp.local."]);
        assert_eq!(config.vocabulary.default_prefix, "#HAA@trcmd");
        assert_eq!(config.github.repo, "esp-homekit-devices");
        assert_eq!(config.setup.port, 4567);
        assert!(config.vocabulary.to_table().unwrap().is_empty());
    }

    #[test]
    fn test_vocabulary_table_keeps_declared_order() {
        let config = parse_config(
            r#"
            [discovery]
            timeout_secs = 5
            service_types = ["_hap._tcp.local."]

            [[vocabulary.table]]
            min_version = "12.14.0"
            prefix = "pt"

            [[vocabulary.table]]
            min_version = "12.10.0"
            prefix = "bl"
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery_timeout(), Duration::from_secs(5));
        assert_eq!(config.discovery.service_types, vec!["_hap._tcp.local."]);
        let table = config.vocabulary.to_table().unwrap();
        assert_eq!(table.entries()[0].prefix, "pt");
        assert_eq!(table.lookup(&Version::parse("12.11").unwrap()), Some("bl"));
    }

    #[test]
    fn test_malformed_threshold_is_rejected() {
        let err = parse_config(
            r#"
            [[vocabulary.table]]
            min_version = "latest"
            prefix = "pt"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Malformed version"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/haa-manager.toml")).unwrap();
        assert_eq!(config.control_timeout(), Duration::from_secs(10));
        assert_eq!(config.probe_timeout(), Duration::from_millis(800));
    }
}
