//! Configuration for the umca orchestrator.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (UMCA_TOPIC, OIDC_ISSUER, GATE_SCORING_URL, ...)
//! 2. Config file (.umca/config.yaml)
//! 3. Built-in defaults
//!
//! Config file discovery:
//! - Searches the start directory and its parents for .umca/config.yaml
//! - Every key in the file is optional

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::core::safety::TaskLimits;

pub const CONFIG_DIR: &str = ".umca";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8787";
pub const DEFAULT_BROKER_ADDRESS: &str = "memory://local";
pub const DEFAULT_TOPIC: &str = "umca-events";
pub const DEFAULT_CONSUMER_GROUP: &str = "umca-orchestrator";
pub const DEFAULT_ISSUER: &str = "http://localhost:8080/realms/stack-a";
pub const DEFAULT_AUDIENCE: &str = "orchestrator";
pub const DEFAULT_WASM_URL: &str = "http://localhost:8001/run";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Gate scoring is required but GATE_SCORING_URL and GATE_SCORING_KEY are not both set")]
    ScoringRequired,
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub version: Option<String>,
    pub listen: Option<String>,
    pub broker: BrokerSection,
    pub identity: IdentitySection,
    pub scoring: ScoringSection,
    pub runtime: RuntimeSection,
    pub limits: TaskLimits,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub address: Option<String>,
    pub topic: Option<String>,
    pub consumer_group: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub url: Option<String>,
    pub key: Option<String>,
    pub required: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub wasm_url: Option<String>,
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerConfig {
    pub address: String,
    pub topic: String,
    pub consumer_group: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_BROKER_ADDRESS.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
        }
    }
}

/// Identity provider settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityConfig {
    pub issuer: String,
    pub audience: String,
    pub jwks_url: String,
}

impl IdentityConfig {
    /// Settings with the key set at the issuer's standard certs endpoint
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let issuer = issuer.into();
        Self {
            jwks_url: default_jwks_url(&issuer),
            issuer,
            audience: audience.into(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER, DEFAULT_AUDIENCE)
    }
}

fn default_jwks_url(issuer: &str) -> String {
    format!(
        "{}/protocol/openid-connect/certs",
        issuer.trim_end_matches('/')
    )
}

/// Gate scoring settings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringConfig {
    pub url: Option<String>,

    #[serde(serialize_with = "mask_secret")]
    pub api_key: Option<String>,

    pub required: bool,
}

/// How gates are evaluated
#[derive(Debug, Clone, PartialEq)]
pub enum GateMode {
    /// Gates are scored by the external service
    Scored { url: String, api_key: String },

    /// No scoring service; every gate passes with an `eval:skipped` event
    Degraded,
}

impl ScoringConfig {
    pub fn gate_mode(&self) -> GateMode {
        match (&self.url, &self.api_key) {
            (Some(url), Some(api_key)) => GateMode::Scored {
                url: url.clone(),
                api_key: api_key.clone(),
            },
            _ => GateMode::Degraded,
        }
    }
}

/// Execution backend settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeConfig {
    pub wasm_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wasm_url: DEFAULT_WASM_URL.to_string(),
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub listen: SocketAddr,
    pub broker: BrokerConfig,
    pub identity: IdentityConfig,
    pub scoring: ScoringConfig,
    pub runtime: RuntimeConfig,
    pub limits: TaskLimits,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8787)),
            broker: BrokerConfig::default(),
            identity: IdentityConfig::default(),
            scoring: ScoringConfig::default(),
            runtime: RuntimeConfig::default(),
            limits: TaskLimits::default(),
            config_file: None,
        }
    }
}

impl ResolvedConfig {
    /// Merge a config file with environment overrides
    ///
    /// `env` returns the value of a variable, treating blank values as unset.
    pub fn resolve(
        file: ConfigFile,
        config_file: Option<PathBuf>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let pick = |key: &str, from_file: Option<String>, default: &str| {
            env(key)
                .or(from_file)
                .unwrap_or_else(|| default.to_string())
        };

        let listen = resolve_listen(env, file.listen)?;

        let broker = BrokerConfig {
            address: pick("BROKER_ADDR", file.broker.address, DEFAULT_BROKER_ADDRESS),
            topic: pick("UMCA_TOPIC", file.broker.topic, DEFAULT_TOPIC),
            consumer_group: pick(
                "UMCA_CONSUMER_GROUP",
                file.broker.consumer_group,
                DEFAULT_CONSUMER_GROUP,
            ),
        };

        let issuer = pick("OIDC_ISSUER", file.identity.issuer, DEFAULT_ISSUER);
        let jwks_url = env("OIDC_JWKS_URL")
            .or(file.identity.jwks_url)
            .unwrap_or_else(|| default_jwks_url(&issuer));
        let identity = IdentityConfig {
            audience: pick("OIDC_AUDIENCE", file.identity.audience, DEFAULT_AUDIENCE),
            issuer,
            jwks_url,
        };

        let required = match env("GATE_SCORING_REQUIRED") {
            Some(value) => parse_bool("GATE_SCORING_REQUIRED", &value)?,
            None => file.scoring.required.unwrap_or(false),
        };
        let scoring = ScoringConfig {
            url: env("GATE_SCORING_URL").or(file.scoring.url),
            api_key: env("GATE_SCORING_KEY").or(file.scoring.key),
            required,
        };
        if scoring.required && scoring.gate_mode() == GateMode::Degraded {
            return Err(ConfigError::ScoringRequired);
        }

        let runtime = RuntimeConfig {
            wasm_url: pick("WASM_URL", file.runtime.wasm_url, DEFAULT_WASM_URL),
        };

        Ok(Self {
            listen,
            broker,
            identity,
            scoring,
            runtime,
            limits: file.limits,
            config_file,
        })
    }

    /// Masked, human-readable rendering
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn resolve_listen(
    env: &dyn Fn(&str) -> Option<String>,
    from_file: Option<String>,
) -> Result<SocketAddr, ConfigError> {
    if let Some(value) = env("UMCA_LISTEN") {
        return parse_listen("UMCA_LISTEN", &value);
    }
    if let Some(port) = env("PORT") {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: "PORT",
            value: port.clone(),
        })?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    parse_listen("listen", from_file.as_deref().unwrap_or(DEFAULT_LISTEN))
}

fn parse_listen(key: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn mask_secret<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str("********"),
        None => serializer.serialize_none(),
    }
}

/// Process environment, ignoring blank values
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    // An empty file parses as YAML null
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration discovered from `start` with the given environment
pub fn load_config_from(
    start: &Path,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig, ConfigError> {
    let config_file = find_config_file(start);
    let file = match config_file {
        Some(ref path) => {
            debug!(path = %path.display(), "Using config file");
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    ResolvedConfig::resolve(file, config_file, env)
}

/// Load configuration from the current directory and process environment
pub fn load_config() -> Result<ResolvedConfig, ConfigError> {
    let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    load_config_from(&start, &process_env)
}
