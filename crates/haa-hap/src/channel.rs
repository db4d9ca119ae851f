//! Control channel over the HAP JSON resource model
//!
//! Session security is established below this layer; the channel sends plain
//! HAP requests to the endpoint recorded for the pairing.

use haa_core::introspection::{Accessory, AccessoryDatabase, CharacteristicLocation};
use haa_core::{ChannelError, ControlChannel};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, trace};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HAP status code for success inside a multi-status response
const HAP_STATUS_SUCCESS: i64 = 0;

#[derive(Serialize)]
struct WriteRequest<'a> {
    characteristics: [WriteValue<'a>; 1],
}

#[derive(Serialize)]
struct WriteValue<'a> {
    aid: u64,
    iid: u64,
    value: &'a str,
}

#[derive(Deserialize)]
struct CharacteristicsResponse {
    #[serde(default)]
    characteristics: Vec<CharacteristicStatus>,
}

#[derive(Deserialize)]
struct CharacteristicStatus {
    aid: u64,
    iid: u64,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<i64>,
}

/// HTTP control channel for one paired accessory
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpChannel {
    pub fn new(client: reqwest::Client, ip: IpAddr, port: u16, timeout: Duration) -> Self {
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        };
        Self {
            client,
            base_url: format!("http://{}:{}", host, port),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_error(&self, e: reqwest::Error) -> ChannelError {
        if e.is_timeout() {
            ChannelError::Timeout(self.timeout)
        } else if e.is_connect() || e.is_request() {
            ChannelError::Unreachable(format!("{}: {}", self.base_url, e))
        } else if e.is_decode() {
            ChannelError::InvalidResponse(e.to_string())
        } else {
            ChannelError::Rejected(e.to_string())
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ChannelError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected(format!("HTTP {}", status)));
        }
        Ok(response)
    }
}

/// Reject a multi-status body carrying a non-zero HAP status
fn check_statuses(body: &str) -> Result<(), ChannelError> {
    if body.trim().is_empty() {
        return Ok(());
    }
    let parsed: CharacteristicsResponse =
        serde_json::from_str(body).map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
    match parsed
        .characteristics
        .iter()
        .find(|c| c.status.unwrap_or(HAP_STATUS_SUCCESS) != HAP_STATUS_SUCCESS)
    {
        Some(failed) => Err(ChannelError::Rejected(format!(
            "HAP status {} for {}.{}",
            failed.status.unwrap_or_default(),
            failed.aid,
            failed.iid
        ))),
        None => Ok(()),
    }
}

/// Pull the value of `location` out of a `/characteristics` read response
fn extract_value(body: &str, location: CharacteristicLocation) -> Result<Option<String>, ChannelError> {
    let parsed: CharacteristicsResponse =
        serde_json::from_str(body).map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
    let entry = parsed
        .characteristics
        .into_iter()
        .find(|c| c.aid == location.aid && c.iid == location.iid)
        .ok_or_else(|| ChannelError::InvalidResponse(format!("no value for {}", location)))?;

    if let Some(status) = entry.status.filter(|s| *s != HAP_STATUS_SUCCESS) {
        return Err(ChannelError::Rejected(format!("HAP status {} for {}", status, location)));
    }

    Ok(match entry.value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl ControlChannel for HttpChannel {
    async fn introspect(&self) -> Result<Vec<Accessory>, ChannelError> {
        let url = format!("{}/accessories", self.base_url);
        trace!(url = %url, "Fetching accessory database");
        let response = self.send(self.client.get(&url)).await?;
        let db: AccessoryDatabase = response.json().await.map_err(|e| self.map_error(e))?;
        debug!(url = %url, accessories = db.accessories.len(), "Fetched accessory database");
        Ok(db.accessories)
    }

    async fn write(&self, location: CharacteristicLocation, value: &str) -> Result<(), ChannelError> {
        let url = format!("{}/characteristics", self.base_url);
        let body = WriteRequest {
            characteristics: [WriteValue {
                aid: location.aid,
                iid: location.iid,
                value,
            }],
        };
        let response = self.send(self.client.put(&url).json(&body)).await?;
        let text = response.text().await.map_err(|e| self.map_error(e))?;
        check_statuses(&text)
    }

    async fn read(&self, location: CharacteristicLocation) -> Result<Option<String>, ChannelError> {
        let url = format!("{}/characteristics?id={}", self.base_url, location);
        let response = self.send(self.client.get(&url)).await?;
        let text = response.text().await.map_err(|e| self.map_error(e))?;
        extract_value(&text, location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const LOC: CharacteristicLocation = CharacteristicLocation { aid: 1, iid: 65012 };

    #[test]
    fn test_base_url() {
        let client = reqwest::Client::new();
        let v4 = HttpChannel::new(client.clone(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 5556, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(v4.base_url(), "http://10.0.0.7:5556");
        let v6 = HttpChannel::new(client, IpAddr::V6(Ipv6Addr::LOCALHOST), 80, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(v6.base_url(), "http://[::1]:80");
    }

    #[test]
    fn test_write_request_body() {
        let body = WriteRequest {
            characteristics: [WriteValue { aid: 1, iid: 65010, value: "pt2" }],
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"characteristics":[{"aid":1,"iid":65010,"value":"pt2"}]}"#
        );
    }

    #[test]
    fn test_check_statuses() {
        assert!(check_statuses("").is_ok());
        assert!(check_statuses(r#"{"characteristics":[{"aid":1,"iid":9,"status":0}]}"#).is_ok());
        let err = check_statuses(r#"{"characteristics":[{"aid":1,"iid":9,"status":-70404}]}"#).unwrap_err();
        assert!(err.to_string().contains("-70404"));
    }

    #[test]
    fn test_extract_value() {
        let body = r#"{"characteristics":[{"aid":1,"iid":65012,"value":"e30="}]}"#;
        assert_eq!(extract_value(body, LOC).unwrap().as_deref(), Some("e30="));

        let empty = r#"{"characteristics":[{"aid":1,"iid":65012,"value":null}]}"#;
        assert_eq!(extract_value(empty, LOC).unwrap(), None);

        let other = r#"{"characteristics":[{"aid":2,"iid":1,"value":"x"}]}"#;
        assert!(matches!(extract_value(other, LOC), Err(ChannelError::InvalidResponse(_))));

        let failed = r#"{"characteristics":[{"aid":1,"iid":65012,"status":-70402}]}"#;
        assert!(matches!(extract_value(failed, LOC), Err(ChannelError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Port 9 on loopback (discard) is not expected to be listening
        let channel = HttpChannel::new(
            reqwest::Client::new(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            9,
            Duration::from_millis(500),
        );
        let err = channel.introspect().await.unwrap_err();
        assert!(matches!(err, ChannelError::Unreachable(_) | ChannelError::Timeout(_)));
    }
}
