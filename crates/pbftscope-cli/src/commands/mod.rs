//! CLI command implementations.

pub mod config;
pub mod replay;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use pbftscope_config::PbftscopeConfig;

/// Loads the layered configuration rooted at `project`.
pub(crate) fn load_config(project: &Path) -> Result<PbftscopeConfig> {
    PbftscopeConfig::load_from_dir(project).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            project.display()
        )
    })
}

/// Recordings ending in `.bin` use the compact binary encoding; anything else
/// is JSON.
pub(crate) fn is_binary_recording(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_format_follows_extension() {
        assert!(is_binary_recording(Path::new("run.bin")));
        assert!(!is_binary_recording(Path::new("run.json")));
        assert!(!is_binary_recording(Path::new("run")));
    }
}
