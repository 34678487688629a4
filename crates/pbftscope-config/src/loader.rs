//! Layered configuration loading.
//!
//! Later layers win: built-in defaults, the user file
//! (`~/.config/pbftscope/config.toml`), `pbftscope.toml` in the project,
//! `pbftscope.local.toml` beside it, then `PBFTSCOPE_*` variables. Keys
//! contain underscores, so nested variables use a double separator:
//! `PBFTSCOPE_PROTOCOL__AUTO_REQUESTS=false`.

use crate::{PbftscopeConfig, Paths};
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loads relative to the working directory with the `PBFTSCOPE` prefix.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "PBFTSCOPE".to_string(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// TOML files that exist, lowest precedence first.
    fn layer_files(&self) -> Vec<PathBuf> {
        let user = Paths::new().user_config_file().ok();
        user.into_iter()
            .chain([
                Paths::project_config_file(&self.project_dir),
                Paths::local_config_file(&self.project_dir),
            ])
            .filter(|path| path.exists())
            .collect()
    }

    /// Merges every layer, resolves relative paths against the project
    /// directory, and validates the result.
    pub fn load(self) -> Result<PbftscopeConfig> {
        let defaults = Config::try_from(&PbftscopeConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);
        for path in self.layer_files() {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: PbftscopeConfig = builder
            .build()
            .context("Failed to merge configuration sources")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        loaded.resolve_paths(&self.project_dir);
        loaded.validate().context("Configuration failed validation")?;
        Ok(loaded)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
