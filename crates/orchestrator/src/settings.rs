//! Orchestrator configuration

use bracketing::BracketRange;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default configuration file name
pub const CONFIG_FILE: &str = "camera-pipeline.toml";

/// Prefix of environment overrides (`CAMERA_PIPELINE_QUEUE_CAPACITY=64`)
pub const ENV_PREFIX: &str = "CAMERA_PIPELINE";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Orchestrator queue capacity (default: 32)
    pub queue_capacity: usize,
    /// Worker queue capacity (default: 16)
    pub worker_queue_capacity: usize,
    /// Upper bound on waiting for a message while streaming (milliseconds)
    pub poll_interval_ms: u64,
    /// Frames between a sensor write and the first frame reflecting it
    pub latency_frames: u32,
    /// Longest burst a client may request
    pub max_burst_length: u32,
    /// Frames captured for HDR
    pub hdr_frame_count: u32,
    /// Exposure sweep for HDR and exposure bracketing (EV)
    pub ev_range: BracketRange,
    /// Lens sweep for focus bracketing (driver steps)
    pub focus_range: BracketRange,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: actor_queue::DEFAULT_CAPACITY,
            worker_queue_capacity: 16,
            poll_interval_ms: 10,
            latency_frames: 2,
            max_burst_length: 10,
            hdr_frame_count: 3,
            ev_range: BracketRange::new(-2.0, 2.0),
            focus_range: BracketRange::new(0.0, 1000.0),
        }
    }
}

impl OrchestratorConfig {
    /// Load defaults, then `path` (or `camera-pipeline.toml` if present),
    /// then `CAMERA_PIPELINE_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };

        let config: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        info!("Loaded orchestrator config: {:?}", config);
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 || self.worker_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be non-zero".into()));
        }
        if self.max_burst_length == 0 {
            return Err(ConfigError::Invalid("max_burst_length must be at least 1".into()));
        }
        if self.hdr_frame_count < 2 || self.hdr_frame_count > self.max_burst_length {
            return Err(ConfigError::Invalid(format!(
                "hdr_frame_count {} outside 2..={}",
                self.hdr_frame_count, self.max_burst_length
            )));
        }
        self.ev_range
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("ev_range: {}", e)))?;
        self.focus_range
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("focus_range: {}", e)))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
