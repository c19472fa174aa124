//! Configuration management
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `YAKYAK__SECTION__KEY` environment variables.

use crate::infrastructure::protocols::sip::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "yakyak-registrar.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "YAKYAK_CONFIG";

const ENV_PREFIX: &str = "YAKYAK";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sip: SipConfig,
    pub transport: TransportConfig,
    pub auth: AuthConfig,
    pub registrar: RegistrarConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub bind_address: String,
    pub bind_port: u16,
    /// Digest realm presented in challenges
    pub realm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub recv_buffer_size: usize,
    /// Datagrams buffered per peer before new ones are dropped
    pub inbound_queue_capacity: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `MD5` or `SHA-256`
    pub algorithm: String,
    pub challenge_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    pub default_expires: u32,
    pub min_expires: u32,
    pub max_expires: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 5060,
            realm: "localhost".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 4096,
            inbound_queue_capacity: 1000,
            idle_timeout_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: "MD5".to_string(),
            challenge_ttl_secs: 30,
            sweep_interval_secs: 10,
            accounts: Vec::new(),
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            default_expires: 3600, // 1 hour
            min_expires: 60,       // 1 minute
            max_expires: 7200,     // 2 hours
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// With `path == None` the file named by `YAKYAK_CONFIG` is used, falling
    /// back to `yakyak-registrar.toml` if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) => config::File::with_name(&path).required(true),
                Err(_) => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
            },
        };

        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sip_bind_addr()?;
        if self.sip.realm.is_empty() {
            return Err(ConfigError::Invalid(
                "sip.realm must not be empty".to_string(),
            ));
        }
        if self.transport.recv_buffer_size == 0 || self.transport.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "transport buffer sizes must be non-zero".to_string(),
            ));
        }
        if self.transport.sweep_interval_secs == 0 || self.auth.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep intervals must be non-zero".to_string(),
            ));
        }
        self.auth.digest_algorithm()?;
        if self.registrar.min_expires > self.registrar.max_expires {
            return Err(ConfigError::Invalid(
                "registrar.min_expires exceeds registrar.max_expires".to_string(),
            ));
        }
        if self.metrics.enabled {
            self.metrics_listen_addr()?;
        }
        Ok(())
    }

    pub fn sip_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.sip.bind_address, self.sip.bind_port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("sip bind address: {}", e)))
    }

    pub fn metrics_listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics
            .listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("metrics.listen: {}", e)))
    }
}

impl TransportConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AuthConfig {
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm, ConfigError> {
        DigestAlgorithm::parse(&self.algorithm).ok_or_else(|| {
            ConfigError::Invalid(format!("unsupported auth.algorithm {:?}", self.algorithm))
        })
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
