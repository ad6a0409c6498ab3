//! etcd-backed address store.
//!
//! Uses the etcd v2 keys API. Each record is a single key,
//! `/{prefix}/{container}/ip`, written with a TTL so that records of
//! containers that disappear age out on their own. etcd drops expired keys,
//! so an expired record reads as not found.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, error};

use crate::store::{StateStore, StoreError};

/// etcd key-not-found error code.
const KEY_NOT_FOUND: u32 = 100;

/// etcd client settings.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    /// Client URL (example: http://etcd:2379).
    pub endpoint: String,

    /// Key prefix, without surrounding slashes.
    pub prefix: String,

    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl EtcdConfig {
    pub fn new(endpoint: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            prefix: prefix.into().trim_matches('/').to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeysError {
    #[serde(rename = "errorCode")]
    error_code: u32,
}

/// etcd v2 address store.
pub struct EtcdStore {
    client: reqwest::Client,
    config: EtcdConfig,
    base_url: Url,
}

impl EtcdStore {
    /// Create a new etcd store client.
    pub fn new(config: EtcdConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                StoreError::Unavailable(format!("invalid etcd endpoint {:?}", config.endpoint))
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// `{endpoint}/v2/keys/{prefix}/{name}/ip`, with `name` escaped as a
    /// single path segment.
    fn key_url(&self, name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v2", "keys"])
                .extend(self.config.prefix.split('/').filter(|s| !s.is_empty()))
                .push(name)
                .push("ip");
        }
        url
    }
}

#[async_trait]
impl StateStore for EtcdStore {
    async fn read_address(&self, name: &str) -> Result<Option<String>, StoreError> {
        let url = self.key_url(name);
        debug!(url = %url, "Reading last known address");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            // Only etcd's own key-not-found answer means "no record".
            return match serde_json::from_str::<KeysError>(&body) {
                Ok(err) if err.error_code == KEY_NOT_FOUND => Ok(None),
                _ => {
                    error!(status = %status, body = %body, "Unexpected not found answer");
                    Err(StoreError::Status { status: 404, body })
                }
            };
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to read address");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let keys: KeysResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        keys.node
            .value
            .map(Some)
            .ok_or_else(|| StoreError::Decode(format!("key {url} holds no value")))
    }

    async fn write_address(
        &self,
        name: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let url = self.key_url(name);
        let ttl = ttl.as_secs().max(1).to_string();
        debug!(url = %url, address = %address, ttl = %ttl, "Writing address");

        let response = self
            .client
            .put(url)
            .form(&[("value", address), ("ttl", ttl.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to write address");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_url() {
        let store = EtcdStore::new(EtcdConfig::new("http://etcd:2379/", "/container/")).unwrap();
        assert_eq!(
            store.key_url("web-1").as_str(),
            "http://etcd:2379/v2/keys/container/web-1/ip"
        );
    }

    #[test]
    fn test_key_url_escapes_name() {
        let store = EtcdStore::new(EtcdConfig::new("http://etcd:2379", "watch/container")).unwrap();
        assert_eq!(
            store.key_url("../web 1").as_str(),
            "http://etcd:2379/v2/keys/watch/container/..%2Fweb%201/ip"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let err = EtcdStore::new(EtcdConfig::new("etcd:2379", "container")).err();
        assert!(matches!(err, Some(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_keys_response_deserialization() {
        let json = r#"{
            "action": "get",
            "node": {
                "key": "/container/web-1/ip",
                "value": "10.0.0.5",
                "expiration": "2026-10-18T12:10:00Z",
                "ttl": 599,
                "modifiedIndex": 7,
                "createdIndex": 7
            }
        }"#;

        let keys: KeysResponse = serde_json::from_str(json).unwrap();
        assert_eq!(keys.node.value.as_deref(), Some("10.0.0.5"));
    }
}
