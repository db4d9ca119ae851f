//! Upstream firmware repository queries
//!
//! The firmware header for a tag is the remote vocabulary source. Tag and
//! release listings are informational only.

use anyhow::{Context, Result};
use haa_core::VocabularySource;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GithubConfig;

const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";
const TAGS_PER_PAGE: usize = 100;

#[derive(Deserialize)]
struct Tag {
    name: String,
}

#[derive(Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Client for the firmware repository on GitHub
pub struct GithubClient {
    client: reqwest::Client,
    owner: String,
    repo: String,
    header_path: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("haa-manager/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            header_path: config.header_path.clone(),
        })
    }

    /// URL of the firmware header at a tag or branch
    pub fn header_url(&self, tag: &str) -> String {
        format!("{}/{}/{}/{}/{}", RAW_BASE, self.owner, self.repo, tag, self.header_path)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", API_BASE, self.owner, self.repo, path)
    }

    /// All tags of the repository, following pagination to the first empty page
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut page = 1;
        loop {
            let url = self.api_url(&format!("tags?per_page={}&page={}", TAGS_PER_PAGE, page));
            debug!(url = %url, "Requesting tags");

            let batch: Vec<Tag> = self
                .client
                .get(&url)
                .send()
                .await
                .context("Failed to fetch tags")?
                .error_for_status()
                .context("Tag listing rejected")?
                .json()
                .await
                .context("Failed to parse tag listing")?;

            if batch.is_empty() {
                break;
            }
            debug!(page = page, count = batch.len(), "Fetched tag page");
            tags.extend(batch.into_iter().map(|t| t.name));
            page += 1;
        }
        Ok(tags)
    }

    /// Tag of the latest published release
    pub async fn latest_release(&self) -> Result<Option<String>> {
        let url = self.api_url("releases/latest");
        debug!(url = %url, "Requesting latest release");

        let release: Release = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch latest release")?
            .error_for_status()
            .context("Latest release request rejected")?
            .json()
            .await
            .context("Failed to parse latest release")?;

        Ok(release.tag_name.or(release.name))
    }
}

impl VocabularySource for GithubClient {
    async fn fetch(&self, tag: &str) -> Option<String> {
        let url = self.header_url(tag);
        debug!(url = %url, "Fetching firmware header");

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to fetch firmware header");
                return None;
            }
        };

        if !response.status().is_success() {
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                debug!(tag = %tag, "No firmware header for tag (404)");
            } else {
                warn!(url = %url, status = %response.status(), "Firmware header fetch failed");
            }
            return None;
        }

        match response.text().await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read firmware header");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = GithubClient::new(&GithubConfig::default()).unwrap();
        assert_eq!(
            client.header_url("HAA_12.14.0"),
            "https://raw.githubusercontent.com/RavenSystem/esp-homekit-devices/HAA_12.14.0/HAA/HAA_Main/main/header.h"
        );
        assert_eq!(
            client.api_url("releases/latest"),
            "https://api.github.com/repos/RavenSystem/esp-homekit-devices/releases/latest"
        );
    }

    #[test]
    fn test_release_falls_back_to_name() {
        let release: Release = serde_json::from_str(r#"{"name": "HAA 12.14.0"}"#).unwrap();
        assert_eq!(release.tag_name.or(release.name).as_deref(), Some("HAA 12.14.0"));
    }
}
