//! Configuration management for pbftscope
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (`PBFTSCOPE_<SECTION>__<KEY>`)
//! 3. pbftscope.local.toml (uncommitted local overrides)
//! 4. pbftscope.toml (project config)
//! 5. ~/.config/pbftscope/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use pbftscope_pbft::ProtocolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main pbftscope configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbftscopeConfig {
    /// Cluster shape, seed, and timing constants.
    pub protocol: ProtocolConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
}

/// How the headless driver steps a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulated microseconds per step.
    pub tick: u64,
    /// Simulated microseconds to run.
    pub duration: u64,
    /// Start from the demonstration scenario instead of a bare cluster.
    pub scenario: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tick: 1_000,
            duration: 1_000_000,
            scenario: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Where `run` writes its recording, if anywhere.
    pub recording: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl PbftscopeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Reads exactly one TOML file, without layering.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks values the protocol would otherwise reject at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol
            .cluster()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let timings = &self.protocol.timings;
        if timings.min_rpc_latency == 0 {
            return Err(ConfigError::ValidationError(
                "protocol.timings.min_rpc_latency must be positive".to_string(),
            ));
        }
        if timings.max_rpc_latency < timings.min_rpc_latency {
            return Err(ConfigError::ValidationError(format!(
                "protocol.timings.max_rpc_latency ({}) is below min_rpc_latency ({})",
                timings.max_rpc_latency, timings.min_rpc_latency
            )));
        }
        if self.run.tick == 0 {
            return Err(ConfigError::ValidationError(
                "run.tick must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if let Some(recording) = self.output.recording.as_mut() {
            if recording.is_relative() {
                *recording = base_dir.as_ref().join(&*recording);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = PbftscopeConfig::default();
        assert_eq!(config.protocol.replicas, 5);
        assert_eq!(config.protocol.timings.min_rpc_latency, 10_000);
        assert_eq!(config.protocol.timings.max_rpc_latency, 15_000);
        assert_eq!(config.protocol.timings.view_change_timeout, 100_000);
        assert_eq!(config.protocol.timings.auto_request_interval, 800_000);
        assert!(config.protocol.auto_requests);
        assert_eq!(config.output.format, OutputFormat::Table);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_small_cluster() {
        let mut config = PbftscopeConfig::default();
        config.protocol.replicas = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_inverted_latency() {
        let mut config = PbftscopeConfig::default();
        config.protocol.timings.max_rpc_latency = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PbftscopeConfig::default();
        config.protocol.seed = 42;
        config.output.format = OutputFormat::Json;

        let text = config.to_toml().expect("Failed to render config");
        let parsed: PbftscopeConfig = toml::from_str(&text).expect("Failed to parse config");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_errors_name_the_path() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            PbftscopeConfig::from_file(&missing),
            Err(ConfigError::ReadError { .. })
        ));

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "[protocol\nreplicas = ").expect("Failed to write config");
        let err = PbftscopeConfig::from_file(&broken).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_path_resolution() {
        let mut config = PbftscopeConfig::default();
        config.output.recording = Some(PathBuf::from("runs/latest.json"));
        config.resolve_paths("/tmp/project");
        assert_eq!(
            config.output.recording,
            Some(PathBuf::from("/tmp/project/runs/latest.json"))
        );
    }
}
