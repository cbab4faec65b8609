// DEVICE DIRECTORY CLIENT
// Read-only view of the registered devices.
//
// A directory failure is fatal to the run. A failed configuration lookup for
// one agent is not: the device is kept as listed.

use async_trait::async_trait;
use checknet_core::{ConfigReference, Device, DirectorySettings};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Device directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Device directory returned status {0}")]
    Status(u16),

    #[error("Character lookup returned status {0}")]
    CharacterStatus(u16),

    #[error("Character lookup returned no configuration")]
    CharacterMissing,
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterResponse {
    #[serde(default)]
    character_config: Option<ConfigReference>,
}

pub struct HttpDeviceDirectory {
    client: Client,
    url: String,
    character_api_url: Option<String>,
    device_limit: usize,
}

impl HttpDeviceDirectory {
    pub fn new(settings: &DirectorySettings) -> Result<Self, DirectoryError> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: Client, settings: &DirectorySettings) -> Self {
        HttpDeviceDirectory {
            client,
            url: settings.url.clone(),
            character_api_url: settings.character_api_url.clone(),
            device_limit: settings.device_limit,
        }
    }

    async fn fetch_character(&self, api_url: &str, agent_id: &str) -> Result<ConfigReference, DirectoryError> {
        let response = self
            .client
            .get(api_url)
            .query(&[("address", agent_id)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::CharacterStatus(status.as_u16()));
        }
        let body: CharacterResponse = response.json().await?;
        body.character_config.ok_or(DirectoryError::CharacterMissing)
    }

    /// Fill in the primary agent's configuration reference from the character API.
    async fn resolve_primary_agent(&self, api_url: &str, device: &mut Device) {
        let agent = match device.agents.first_mut() {
            Some(agent) => agent,
            None => {
                debug!("Device {} has no agents, skipping character lookup", device.id);
                return;
            }
        };
        match self.fetch_character(api_url, &agent.id).await {
            Ok(reference) => {
                debug!("Retrieved character config for agent {}", agent.id);
                agent.character_config = Some(reference);
            }
            Err(e) => warn!(
                "Could not fetch character config for device {}: {}",
                device.id, e
            ),
        }
    }
}

#[async_trait]
impl DeviceDirectory for HttpDeviceDirectory {
    async fn list_devices(&self) -> Result<Vec<Device>, DirectoryError> {
        info!("Fetching devices from {}", self.url);
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let mut devices: Vec<Device> = response.json().await?;
        info!("Directory returned {} devices", devices.len());
        if devices.len() > self.device_limit {
            warn!("Truncating device list to the first {}", self.device_limit);
            devices.truncate(self.device_limit);
        }

        if let Some(api_url) = &self.character_api_url {
            for device in devices.iter_mut() {
                self.resolve_primary_agent(api_url, device).await;
            }
        }
        Ok(devices)
    }
}
