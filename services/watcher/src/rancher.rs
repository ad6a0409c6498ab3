//! Rancher metadata API client.
//!
//! Implements [`ContainerDirectory`] on top of the Rancher REST API:
//! - `GET /containers?state=running[&name=..]` for listing and lookups
//! - the container's `restart` action for restarts
//! - `GET /containers/{id}` polling until the container is running again

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ipwatch_reconcile::{
    Labels, ManagedContainer, ManagedFilter, DEFAULT_ADDRESS_LABEL, RUNNING_STATE,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::directory::{ContainerDirectory, DirectoryError};

/// Rancher client settings.
#[derive(Debug, Clone)]
pub struct RancherConfig {
    /// API base URL, without trailing slash.
    pub api_url: String,

    pub api_key: String,

    pub api_secret: String,

    /// Label carrying the container address. `primaryIpAddress` is used
    /// when the label is missing.
    pub address_label: String,

    /// Delay between two state polls after a restart.
    pub restart_poll_interval: Duration,

    /// Polls before a restart is reported as failed.
    pub restart_poll_attempts: u32,

    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl RancherConfig {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            address_label: DEFAULT_ADDRESS_LABEL.to_string(),
            restart_poll_interval: Duration::from_secs(1),
            restart_poll_attempts: 120,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    data: Vec<T>,
}

/// Container resource, reduced to what the watcher reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RancherContainer {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Labels,
    #[serde(default)]
    primary_ip_address: Option<String>,
    #[serde(default)]
    actions: HashMap<String, String>,
}

/// Rancher API client.
pub struct RancherDirectory {
    client: reqwest::Client,
    config: RancherConfig,
}

impl RancherDirectory {
    /// Create a new Rancher client.
    pub fn new(config: RancherConfig) -> Result<Self, DirectoryError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Check that the API answers with the configured credentials.
    pub async fn probe(&self) -> Result<(), DirectoryError> {
        debug!(url = %self.config.api_url, "Probing Rancher API");
        let response = self.get(&self.config.api_url).send().await?;
        check_status(response).await?;
        Ok(())
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
    }

    fn containers_url(&self) -> String {
        format!("{}/containers", self.config.api_url)
    }

    async fn get_containers(
        &self,
        state: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<RancherContainer>, DirectoryError> {
        let mut query = Vec::new();
        if let Some(state) = state {
            query.push(("state", state));
        }
        if let Some(name) = name {
            query.push(("name", name));
        }

        let response = self
            .get(&self.containers_url())
            .query(&query)
            .send()
            .await?;
        let collection: Collection<RancherContainer> = check_status(response).await?.json().await?;

        Ok(collection.data)
    }

    async fn get_container(&self, id: &str) -> Result<RancherContainer, DirectoryError> {
        let url = format!("{}/{}", self.containers_url(), id);
        let response = self.get(&url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Poll until `id` reports `state`, giving up after the configured
    /// number of attempts. The whole wait, including the last poll's answer,
    /// ends `restart_poll_attempts + 1` poll intervals after it started.
    async fn wait_for_state(&self, id: &str, state: &str) -> Result<(), DirectoryError> {
        info!(container_id = %id, state = %state, "Waiting for container state");

        let interval = self.config.restart_poll_interval;
        let deadline = Instant::now() + interval * (self.config.restart_poll_attempts + 1);

        for attempt in 1..=self.config.restart_poll_attempts {
            tokio::time::sleep(interval).await;

            let Ok(polled) = tokio::time::timeout_at(deadline, self.get_container(id)).await
            else {
                debug!(container_id = %id, attempt, "Wait deadline reached");
                break;
            };

            match polled {
                Ok(container) if container.state == state => {
                    debug!(container_id = %id, attempt, "Container reached state");
                    return Ok(());
                }
                Ok(container) => {
                    debug!(
                        container_id = %id,
                        current = %container.state,
                        attempt,
                        "Still waiting for container"
                    );
                }
                Err(e) => {
                    debug!(container_id = %id, error = %e, attempt, "Poll failed");
                }
            }
        }

        Err(DirectoryError::WaitExhausted {
            id: id.to_string(),
            attempts: self.config.restart_poll_attempts,
        })
    }

    fn to_managed(&self, container: RancherContainer) -> ManagedContainer {
        let address = container
            .labels
            .get(&self.config.address_label)
            .map(str::to_string)
            .or(container.primary_ip_address);

        ManagedContainer {
            name: container.name.unwrap_or_else(|| container.id.clone()),
            id: container.id,
            labels: container.labels,
            address,
        }
    }
}

#[async_trait]
impl ContainerDirectory for RancherDirectory {
    async fn list_managed(
        &self,
        filter: &ManagedFilter,
    ) -> Result<Vec<ManagedContainer>, DirectoryError> {
        let containers = self.get_containers(Some(filter.state.as_str()), None).await?;
        let total = containers.len();

        let managed: Vec<_> = containers
            .into_iter()
            .filter(|c| filter.matches(&c.labels, &c.state))
            .map(|c| self.to_managed(c))
            .collect();
        debug!(total, managed = managed.len(), "Fetched containers");

        Ok(managed)
    }

    async fn find_running_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<ManagedContainer>, DirectoryError> {
        let containers = self.get_containers(Some(RUNNING_STATE), Some(name)).await?;

        Ok(containers
            .into_iter()
            .filter(|c| c.state == RUNNING_STATE && c.name.as_deref() == Some(name))
            .map(|c| self.to_managed(c))
            .collect())
    }

    async fn restart_and_wait(&self, id: &str) -> Result<(), DirectoryError> {
        info!(container_id = %id, "Restarting container");

        let container = self.get_container(id).await?;
        let restart_url = container
            .actions
            .get("restart")
            .ok_or_else(|| DirectoryError::ActionUnavailable { id: id.to_string() })?;

        debug!(url = %restart_url, "Executing restart action");
        let response = self
            .client
            .post(restart_url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .send()
            .await?;
        check_status(response).await?;

        self.wait_for_state(id, RUNNING_STATE).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "Rancher API request failed");
    Err(DirectoryError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_deserialization() {
        let json = r#"{
            "data": [
                {
                    "id": "1i42",
                    "name": "web-1",
                    "state": "running",
                    "externalId": "9f1c",
                    "primaryIpAddress": "10.42.3.7",
                    "labels": {
                        "io.rancher.container.ip": "10.42.3.7/16",
                        "cloud.hutter.watcher.ip.enable": "true"
                    },
                    "actions": {
                        "restart": "http://rancher/v2-beta/containers/1i42/?action=restart"
                    }
                },
                { "id": "1i43" }
            ]
        }"#;

        let collection: Collection<RancherContainer> = serde_json::from_str(json).unwrap();
        assert_eq!(collection.data.len(), 2);
        assert_eq!(collection.data[0].state, "running");
        assert!(collection.data[0].actions.contains_key("restart"));
        assert!(collection.data[1].name.is_none());
        assert!(collection.data[1].labels.is_empty());
    }

    #[test]
    fn test_address_prefers_label() {
        let directory =
            RancherDirectory::new(RancherConfig::new("http://rancher", "k", "s")).unwrap();

        let labelled: RancherContainer = serde_json::from_str(
            r#"{"id": "1i1", "name": "web-1", "primaryIpAddress": "10.0.0.1",
                "labels": {"io.rancher.container.ip": "10.42.0.9"}}"#,
        )
        .unwrap();
        assert_eq!(
            directory.to_managed(labelled).address.as_deref(),
            Some("10.42.0.9")
        );

        let bare: RancherContainer =
            serde_json::from_str(r#"{"id": "1i2", "primaryIpAddress": "10.0.0.2"}"#).unwrap();
        let managed = directory.to_managed(bare);
        assert_eq!(managed.address.as_deref(), Some("10.0.0.2"));
        assert_eq!(managed.name, "1i2");
    }
}
