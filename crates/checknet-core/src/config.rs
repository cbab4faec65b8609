// PROCESS CONFIGURATION
// Layered: built-in defaults < optional TOML file < CHECKNET_* environment variables.
//
// Nested keys use `__` in the environment, e.g. CHECKNET_STORAGE__URL or
// CHECKNET_PROBE__VERIFICATION_POLICY=enforce.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "CHECKNET";
pub const CONFIG_PATH_VAR: &str = "CHECKNET_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What a configuration mismatch does to a probe sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Mismatch only clears `characterVerified`
    #[default]
    Advisory,
    /// Mismatch (or unverifiable configuration) fails the sample
    Enforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Score of the single (first valid) vote
    #[default]
    Single,
    /// Score of the per-field median of all valid votes
    Median,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Endpoint returning the registered devices
    pub url: String,
    /// Optional resolver for agent configuration references (`?address=<agent>`)
    pub character_api_url: Option<String>,
    pub device_limit: usize,
    pub timeout_secs: u64,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        DirectorySettings {
            url: String::new(),
            character_api_url: None,
            device_limit: 100,
            timeout_secs: 15,
        }
    }
}

impl DirectorySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub samples: usize,
    pub sample_interval_ms: u64,
    pub timeout_secs: u64,
    pub verification_policy: VerificationPolicy,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            samples: 5,
            sample_interval_ms: 1_000,
            timeout_secs: 15,
            verification_policy: VerificationPolicy::Advisory,
        }
    }
}

impl ProbeSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    /// Cancel the run after this many seconds
    pub run_deadline_secs: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            batch_size: 5,
            batch_interval_ms: 5_000,
            run_deadline_secs: None,
        }
    }
}

impl SchedulerSettings {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub network_id: String,
    pub subnet_id: String,
    pub record_version: String,
    pub quorum: u32,
    pub consensus_threshold: f64,
    pub strategy: StrategyKind,
    /// Minimum valid votes for the median strategy
    pub min_checkers: usize,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        ConsensusSettings {
            network_id: "checker-network-mainnet".to_string(),
            subnet_id: "franky-device-checker".to_string(),
            record_version: "1.0.0".to_string(),
            quorum: 1,
            consensus_threshold: 1.0,
            strategy: StrategyKind::Single,
            min_checkers: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Base URL of the object-storage API
    pub url: String,
    pub bucket: String,
    pub protocol: String,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single backoff delay
    pub retry_max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            url: String::new(),
            bucket: "device-reputation".to_string(),
            protocol: "filecoin".to_string(),
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

impl StorageSettings {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Hex-encoded 32-byte ed25519 seed
    pub signing_key_hex: Option<String>,
    /// Append-only JSON-lines proof log; in-memory when absent
    pub proof_log_path: Option<String>,
}

/// Full checker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub directory: DirectorySettings,
    pub probe: ProbeSettings,
    pub scheduler: SchedulerSettings,
    pub consensus: ConsensusSettings,
    pub storage: StorageSettings,
    pub identity: IdentitySettings,
}

impl CheckerConfig {
    /// Load from `CHECKNET_CONFIG` (or `./checknet.toml` if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_VAR).ok();
        let file = match explicit.as_deref() {
            Some(path) => File::from(Path::new(path)).required(true),
            None => File::with_name("checknet").required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(Self::environment())
            .build()?;
        let cfg: CheckerConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a TOML document layered under the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(Self::environment())
            .build()?;
        let cfg: CheckerConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_http_url("directory.url", &self.directory.url)?;
        if let Some(url) = &self.directory.character_api_url {
            require_http_url("directory.character_api_url", url)?;
        }
        require_http_url("storage.url", &self.storage.url)?;

        if self.probe.samples == 0 {
            return Err(ConfigError::Invalid("probe.samples must be > 0".to_string()));
        }
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::Invalid("scheduler.batch_size must be > 0".to_string()));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.bucket cannot be empty".to_string()));
        }
        if self.consensus.quorum == 0 {
            return Err(ConfigError::Invalid("consensus.quorum must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.consensus.consensus_threshold) {
            return Err(ConfigError::Invalid(
                "consensus.consensus_threshold must be between 0 and 1".to_string(),
            ));
        }
        if self.consensus.strategy == StrategyKind::Median && self.consensus.min_checkers == 0 {
            return Err(ConfigError::Invalid("consensus.min_checkers must be > 0".to_string()));
        }
        Ok(())
    }
}

fn require_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is required", key)));
    }
    let rest = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
        .ok_or_else(|| ConfigError::Invalid(format!("{} must be an http(s) URL: {}", key, value)))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(ConfigError::Invalid(format!("{} has no host: {}", key, value)));
    }
    Ok(())
}
