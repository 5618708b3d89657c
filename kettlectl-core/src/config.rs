//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KETTLECTL_CONFIG)
//! 3. Environment variables

use kettlectl_protocol::frame::HEADER_SIZE;
use kettlectl_protocol::{ProtocolVersion, RegistrationKey, StatusLayout, BUFFER_CAPACITY, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Protocol engine configuration.
    pub engine: EngineConfig,
    /// Stdin/stdout bridge configuration.
    pub bridge: BridgeConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("KETTLECTL_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored and leave the current setting in place.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.engine.apply_overrides(&lookup);
        self.bridge.apply_overrides(&lookup);
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.bridge.validate()
    }
}

/// Protocol engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Revision byte embedded in every outbound payload.
    pub protocol_version: ProtocolVersion,
    /// Pairing key. Handshakes are refused without one.
    pub registration_key: Option<RegistrationKey>,
    /// Send register (pairing) instead of hello on connect.
    pub use_register: bool,
    /// Extended status layout of the target firmware.
    pub status_layout: StatusLayout,
    /// Status polls sent without a report before readings go stale.
    pub liveness_threshold: u32,
    /// Largest inbound payload accepted by the decoder.
    pub max_payload_size: usize,
    /// Sequence delays and timeouts.
    pub timing: TimingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V1,
            registration_key: None,
            use_register: false,
            status_layout: StatusLayout::Current,
            liveness_threshold: 10,
            max_payload_size: MAX_PAYLOAD_SIZE,
            timing: TimingConfig::default(),
        }
    }
}

impl EngineConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(version) = lookup("KETTLECTL_PROTOCOL_VERSION") {
            if let Some(parsed) = version
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(|v| ProtocolVersion::try_from(v).ok())
            {
                self.protocol_version = parsed;
            }
        }

        if let Some(key) = lookup("KETTLECTL_REGISTRATION_KEY") {
            if let Ok(parsed) = key.parse() {
                self.registration_key = Some(parsed);
            }
        }

        if let Some(register) = lookup("KETTLECTL_USE_REGISTER") {
            self.use_register = register == "1" || register.to_lowercase() == "true";
        }

        if let Some(interval) = lookup("KETTLECTL_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.timing.poll_interval_ms = ms;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "liveness_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_payload_size + HEADER_SIZE > BUFFER_CAPACITY {
            return Err(ConfigError::ValidationError(format!(
                "max_payload_size {} does not fit the {}-byte receive buffer",
                self.max_payload_size, BUFFER_CAPACITY
            )));
        }
        self.timing.validate()
    }
}

/// Delays and timeouts driving the command sequences, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long the handshake may wait for its ack.
    pub handshake_timeout_ms: u64,
    /// Delay before a mode or temperature change.
    pub pre_setpoint_delay_ms: u64,
    /// Delay before re-polling after a change.
    pub post_setpoint_delay_ms: u64,
    /// Delay between repeated poll and stop steps.
    pub control_delay_ms: u64,
    /// Watchdog for sequences that stop making progress.
    pub idle_timeout_ms: u64,
    /// Minimum spacing of idle status polls.
    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5000,
            pre_setpoint_delay_ms: 60,
            post_setpoint_delay_ms: 100,
            control_delay_ms: 50,
            idle_timeout_ms: 30_000,
            poll_interval_ms: 1000,
        }
    }
}

impl TimingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 || self.idle_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.idle_timeout_ms < self.handshake_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "idle_timeout_ms ({}) is shorter than handshake_timeout_ms ({})",
                self.idle_timeout_ms, self.handshake_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Bridge binary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Period of the engine tick.
    pub tick_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
        }
    }
}

impl BridgeConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(interval) = lookup("KETTLECTL_TICK_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.tick_interval_ms = ms;
            }
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tick_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
