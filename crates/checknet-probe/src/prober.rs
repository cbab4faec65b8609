// HEALTH PROBER
// One verification probe against one device.
//
//   1. POST {agentAddress, deviceAddress} to <link>/api/chat/health
//   2. GET the configuration document named by the response's characterUrl
//   3. Compare it against the agent's authoritative configuration
//
// SAFETY INVARIANTS:
// 1. A probe never returns an error: every failure becomes a failed ProbeSample
// 2. Every HTTP call is bounded by the client timeout
// 3. characterVerified reflects only the configuration comparison
// 4. No shared state is mutated

use crate::status::ProbeError;
use async_trait::async_trait;
use checknet_core::{Agent, ConfigReference, Device, ProbeSample, ProbeSettings, VerificationPolicy};
use log::{debug, info, warn};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, device: &Device, agent: &Agent) -> ProbeSample;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthRequest<'a> {
    agent_address: &'a str,
    device_address: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    character_url: Option<String>,
}

#[derive(Clone)]
pub struct HttpProber {
    client: Client,
    policy: VerificationPolicy,
}

impl HttpProber {
    pub fn new(settings: &ProbeSettings) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(Self::with_client(client, settings.verification_policy))
    }

    pub fn with_client(client: Client, policy: VerificationPolicy) -> Self {
        HttpProber { client, policy }
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Returns the health response status and whether the configuration verified.
    async fn check(&self, device: &Device, agent: &Agent) -> Result<(u16, bool), ProbeError> {
        let endpoint = device.health_endpoint().ok_or(ProbeError::NoEndpoint)?;
        debug!("Health check request to {} for agent {}", endpoint, agent.id);

        let response = self
            .client
            .post(&endpoint)
            .header(ACCEPT, "application/json")
            .json(&HealthRequest {
                agent_address: &agent.id,
                device_address: &device.id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProbeError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let health: HealthResponse = response.json().await?;
        if !health.success {
            return Err(ProbeError::Unsuccessful);
        }
        let character_url = health.character_url.ok_or(ProbeError::MissingCharacterUrl)?;
        let served = self.fetch_document(&character_url).await?;

        let verified = self.verify_configuration(device, agent, &served).await?;
        Ok((status.as_u16(), verified))
    }

    async fn fetch_document(&self, url: &str) -> Result<Value, ProbeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::CharacterFetch(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn authoritative_configuration(&self, reference: &ConfigReference) -> Result<Value, ProbeError> {
        match reference {
            ConfigReference::Inline(document) => Ok(document.clone()),
            ConfigReference::Url(url) => self.fetch_document(url).await,
        }
    }

    /// Applies the verification policy to the configuration comparison.
    async fn verify_configuration(&self, device: &Device, agent: &Agent, served: &Value) -> Result<bool, ProbeError> {
        let reference = match &agent.character_config {
            Some(reference) => reference,
            None => {
                debug!("Agent {} has no authoritative configuration to compare", agent.id);
                return Ok(false);
            }
        };

        let outcome = match self.authoritative_configuration(reference).await {
            Ok(expected) if &expected == served => return Ok(true),
            Ok(_) => "served configuration differs from the agent's configuration".to_string(),
            Err(e) => format!("could not fetch the agent's configuration: {}", e),
        };

        match self.policy {
            VerificationPolicy::Advisory => {
                warn!("Could not verify character data for device {}: {}", device.id, outcome);
                Ok(false)
            }
            VerificationPolicy::Enforce => Err(ProbeError::ConfigMismatch(outcome)),
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, device: &Device, agent: &Agent) -> ProbeSample {
        info!("Checking health for device {} with agent {}", device.id, agent.id);
        let started = Instant::now();
        let result = self.check(device, agent).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((status_code, verified)) => {
                debug!(
                    "Device {} healthy in {}ms (configuration verified: {})",
                    device.id, response_time_ms, verified
                );
                ProbeSample::succeeded(response_time_ms, status_code, verified)
            }
            Err(e) => {
                warn!("Health check failed for device {}: {}", device.id, e);
                ProbeSample::failed(response_time_ms, e.status_code(), e.to_string())
            }
        }
    }
}
