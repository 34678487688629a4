//! Recording playback.

use std::path::Path;

use anyhow::{Context, Result};
use pbftscope_config::OutputFormat;
use pbftscope_sim::Simulation;
use pbftscope_types::SimTime;

use super::{is_binary_recording, load_config};
use crate::report::{ClusterReport, format_micros};
use crate::style;

pub fn run(project: &Path, recording: &Path, at: Option<u64>, json: bool) -> Result<()> {
    let config = load_config(project)?;
    let sim = load_at(&config.protocol, recording, at)?;

    let report = ClusterReport::capture(&sim);
    if json || config.output.format == OutputFormat::Json {
        report.print_json()
    } else {
        report.print_table();
        Ok(())
    }
}

/// Imports `recording` and seeks to `at`, or to the end of its history.
///
/// Times past the recorded end are reached by running forward from the
/// last checkpoint.
fn load_at(
    protocol: &pbftscope_pbft::ProtocolConfig,
    recording: &Path,
    at: Option<u64>,
) -> Result<Simulation> {
    let bytes = std::fs::read(recording)
        .with_context(|| format!("Failed to read recording {}", recording.display()))?;

    // Import replaces the whole history, so the configured protocol only
    // matters until then.
    let mut sim = Simulation::new(protocol).context("Failed to build cluster")?;
    if is_binary_recording(recording) {
        sim.import_bytes(&bytes)
    } else {
        let text = String::from_utf8(bytes).context("Recording is not valid UTF-8")?;
        sim.import_json(&text)
    }
    .with_context(|| format!("Failed to import recording {}", recording.display()))?;

    let target = at.map_or(sim.max_time(), SimTime::from_micros);
    if target > sim.max_time() {
        style::print_warn(&format!(
            "Recording ends at {}; simulating forward to {}",
            sim.max_time(),
            format_micros(target.as_micros())
        ));
    }
    sim.seek(target)
        .with_context(|| format!("Failed to seek to {target}"))?;
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftscope_pbft::ProtocolConfig;

    fn recorded(dir: &Path, name: &str) -> (Simulation, std::path::PathBuf) {
        let config = ProtocolConfig {
            auto_requests: false,
            seed: 21,
            ..ProtocolConfig::default()
        };
        let mut sim = Simulation::new(&config).unwrap();
        sim.setup_scenario().unwrap();
        sim.run_until(SimTime::from_micros(150_000), 1_000).unwrap();

        let path = dir.join(name);
        let bytes = if is_binary_recording(&path) {
            sim.export_bytes().unwrap()
        } else {
            sim.export_json().unwrap().into_bytes()
        };
        std::fs::write(&path, bytes).unwrap();
        (sim, path)
    }

    #[test]
    fn replay_defaults_to_end_of_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (original, path) = recorded(dir.path(), "run.json");

        let replayed = load_at(&ProtocolConfig::default(), &path, None).unwrap();
        assert_eq!(replayed.time(), SimTime::from_micros(150_000));
        assert_eq!(replayed.cluster(), original.cluster());
    }

    #[test]
    fn replay_seeks_into_the_middle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut original, path) = recorded(dir.path(), "run.bin");

        let replayed = load_at(&ProtocolConfig::default(), &path, Some(60_000)).unwrap();
        original.seek(SimTime::from_micros(60_000)).unwrap();
        assert_eq!(replayed.cluster(), original.cluster());
    }

    #[test]
    fn missing_recording_names_the_path() {
        let err = load_at(&ProtocolConfig::default(), Path::new("/nonexistent/run.json"), None)
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/run.json"));
    }
}
