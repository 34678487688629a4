//! Configuration management commands.

use std::path::Path;

use anyhow::{Result, bail};

use super::load_config;

/// Prints the merged configuration.
pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = load_config(project)?;

    match format {
        "toml" => print!("{}", config.to_toml()?),
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        other => bail!("Unknown format '{other}' (expected toml or json)"),
    }

    Ok(())
}
