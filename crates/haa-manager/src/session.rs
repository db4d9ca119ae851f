//! Per-run session state
//!
//! Built once at startup and passed by reference to every command.

use anyhow::{Context, Result};
use haa_core::{CommandDispatcher, CommandVocabulary, DeviceRegistry};
use haa_discovery::MdnsDiscovery;
use haa_hap::{HttpChannel, JsonPairingStore};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::github::GithubClient;

pub struct Session {
    pub config: Config,
    pub registry: DeviceRegistry<HttpChannel>,
    pub vocabulary: CommandVocabulary<GithubClient>,
    /// Set on Ctrl-C; checked before each device is handled
    pub cancelled: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let vocabulary = CommandVocabulary::new(config.vocabulary.to_table()?, GithubClient::new(&config.github)?)
            .with_product(&config.vocabulary.product)
            .with_default_branch(&config.vocabulary.default_branch)
            .with_default_prefix(&config.vocabulary.default_prefix);

        Ok(Self {
            registry: DeviceRegistry::new(&config.discovery.manufacturer_tag),
            vocabulary,
            cancelled: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn github(&self) -> &GithubClient {
        self.vocabulary.source()
    }

    /// Listen for accessories for the configured timeout
    pub async fn discover(&mut self) -> Result<usize> {
        let transport = MdnsDiscovery::new(&self.config.discovery.service_types);
        let timeout = self.config.discovery_timeout();
        info!(timeout_secs = timeout.as_secs(), "Discovering HAA devices in the network...");
        self.registry
            .discover(&transport, timeout)
            .await
            .context("Discovery failed")
    }

    pub fn load_pairings(&mut self, path: &Path) -> Result<usize> {
        let store = JsonPairingStore::new(self.config.control_timeout());
        self.registry
            .load_paired(&store, path)
            .context("Cannot continue without pairing data")
    }

    pub fn dispatcher(&self) -> CommandDispatcher<'_, HttpChannel, GithubClient> {
        CommandDispatcher::new(&self.registry, &self.vocabulary).with_cancel_flag(self.cancelled.clone())
    }
}
