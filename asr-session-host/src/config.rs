//! Host configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! mirroring the pattern used by the teacher's headless server binary.

use std::path::Path;

use anyhow::{Context, Result};
use asr_session_core::SessionConfig;
use serde::Deserialize;

/// Host configuration: the session config plus where to read/log to.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HostConfig {
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl HostConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ASR_SESSION_DUMP_PATH") {
            self.session.dump_path = val;
        }
        if let Ok(val) = std::env::var("ASR_SESSION_DUMP") {
            if let Ok(enabled) = val.parse() {
                self.session.dump = enabled;
            }
        }
        if let Ok(val) = std::env::var("ASR_SESSION_SAMPLE_RATE") {
            if let Ok(rate) = val.parse() {
                self.session.sample_rate = rate;
            }
        }
        if let Ok(val) = std::env::var("ASR_SESSION_ENABLE_UTTERANCE_GROUPING") {
            if let Ok(enabled) = val.parse() {
                self.session.enable_utterance_grouping = enabled;
            }
        }
    }
}
