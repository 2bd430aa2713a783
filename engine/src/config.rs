//! Engine configuration.
//!
//! A single capability struct replaces per-feature engine variants: depth
//! testing, texture sampling and the number of frames in flight are switches
//! on [`EngineConfig`] rather than separate engine types.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frames in flight used when nothing else is configured.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound accepted for `frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which presentation mode the swapchain should ask for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Mailbox when the surface offers it, FIFO otherwise.
    #[default]
    LowLatency,
    /// Always FIFO.
    Vsync,
}

/// Minimum severity of validation messages that reach the log.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub title: String,
    pub frames_in_flight: usize,
    pub depth_buffer: bool,
    pub texture_sampling: bool,
    pub present_mode: PresentModePreference,
    pub validation: bool,
    pub validation_severity: Severity,
    pub show_fps: bool,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Lockstep".to_string(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            depth_buffer: true,
            texture_sampling: true,
            present_mode: PresentModePreference::default(),
            validation: cfg!(debug_assertions),
            validation_severity: Severity::default(),
            show_fps: false,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.title.is_empty() {
            return Err(ConfigError::Invalid("title must not be empty".to_string()));
        }
        Ok(())
    }
}
