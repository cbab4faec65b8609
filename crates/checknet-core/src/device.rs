// DEVICE DIRECTORY MODEL
// Devices and the agents they host, as listed by the external directory.
//
// INVARIANTS:
// 1. A device is checkable only if it exposes an endpoint AND hosts at least one agent
// 2. Non-checkable devices are skipped before any probe is issued, never scored
// 3. The first listed agent is the primary agent used for verification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to the configuration document an agent is expected to serve.
///
/// The directory returns either a URL to fetch, or the document inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigReference {
    /// Location of the authoritative JSON document
    Url(String),

    /// The authoritative document itself
    Inline(serde_json::Value),
}

/// A workload hosted by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Agent address / identifier
    pub id: String,

    /// Authoritative configuration reference (absent when the directory has none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_config: Option<ConfigReference>,
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device address
    pub id: String,

    /// Publicly reachable base URL of the device, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngrok_link: Option<String>,

    /// Hosted agents; the directory may omit the field entirely
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// Why a device was not scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Device has no reachable endpoint
    NoEndpoint,
    /// Device hosts no agents
    NoAgents,
    /// Every probe sample failed
    NoEvidence,
    /// The consensus strategy produced no score
    NoConsensus,
    /// The run was cancelled before the record could be written
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoEndpoint => write!(f, "no reachable endpoint"),
            SkipReason::NoAgents => write!(f, "no agents found for this device"),
            SkipReason::NoEvidence => write!(f, "all health checks failed"),
            SkipReason::NoConsensus => write!(f, "no consensus reached"),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl Device {
    /// Return the endpoint and primary agent, or the reason this device cannot be checked.
    pub fn checkable(&self) -> Result<(&str, &Agent), SkipReason> {
        let endpoint = match self.ngrok_link.as_deref() {
            Some(link) if !link.trim().is_empty() => link,
            _ => return Err(SkipReason::NoEndpoint),
        };
        let agent = self.agents.first().ok_or(SkipReason::NoAgents)?;
        Ok((endpoint, agent))
    }

    /// Health endpoint of this device (`<link>/api/chat/health`).
    pub fn health_endpoint(&self) -> Option<String> {
        self.ngrok_link.as_deref().map(|link| {
            let base = link.trim_end_matches('/');
            format!("{}/api/chat/health", base)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(link: Option<&str>, agents: usize) -> Device {
        Device {
            id: "0xAbC".to_string(),
            ngrok_link: link.map(str::to_string),
            agents: (0..agents)
                .map(|i| Agent {
                    id: format!("agent-{}", i),
                    character_config: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_checkable_requires_endpoint_and_agent() {
        assert_eq!(device(None, 1).checkable().unwrap_err(), SkipReason::NoEndpoint);
        assert_eq!(device(Some("  "), 1).checkable().unwrap_err(), SkipReason::NoEndpoint);
        assert_eq!(device(Some("https://d.example"), 0).checkable().unwrap_err(), SkipReason::NoAgents);

        let d = device(Some("https://d.example"), 2);
        let (endpoint, agent) = d.checkable().unwrap();
        assert_eq!(endpoint, "https://d.example");
        assert_eq!(agent.id, "agent-0");
    }

    #[test]
    fn test_health_endpoint_normalizes_trailing_slash() {
        assert_eq!(
            device(Some("https://d.example/"), 1).health_endpoint().unwrap(),
            "https://d.example/api/chat/health"
        );
        assert_eq!(
            device(Some("https://d.example"), 1).health_endpoint().unwrap(),
            "https://d.example/api/chat/health"
        );
    }

    #[test]
    fn test_directory_json_shape() {
        let json = r#"[
            {"id": "0x1", "ngrokLink": "https://a.example", "agents": [
                {"id": "0xa1", "characterConfig": "https://cfg.example/a1.json"}
            ]},
            {"id": "0x2", "agents": [{"id": "0xa2", "characterConfig": {"name": "inline"}}]},
            {"id": "0x3"}
        ]"#;
        let devices: Vec<Device> = serde_json::from_str(json).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(
            devices[0].agents[0].character_config,
            Some(ConfigReference::Url("https://cfg.example/a1.json".to_string()))
        );
        assert!(matches!(
            devices[1].agents[0].character_config,
            Some(ConfigReference::Inline(_))
        ));
        assert!(devices[2].agents.is_empty());
    }
}
