//! Headless simulation run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use pbftscope_config::{OutputFormat, PbftscopeConfig};
use pbftscope_pbft::MessageKind;
use pbftscope_sim::Simulation;
use pbftscope_types::{NodeId, ReplicaId, SimTime};
use tracing::info;

use super::{is_binary_recording, load_config};
use crate::report::{ClusterReport, format_micros};
use crate::style::{self, colors::SemanticStyle};

/// Command-line overrides and fault injections for `run`.
pub struct RunArgs {
    pub duration: Option<u64>,
    pub tick: Option<u64>,
    pub seed: Option<u64>,
    pub replicas: Option<usize>,
    pub no_scenario: bool,
    pub stop: Vec<u8>,
    pub drop_commits_from: Option<u8>,
    pub fault_at: u64,
    pub record: Option<PathBuf>,
    pub json: bool,
}

impl RunArgs {
    fn apply_to(&self, config: &mut PbftscopeConfig) {
        if let Some(duration) = self.duration {
            config.run.duration = duration;
        }
        if let Some(tick) = self.tick {
            config.run.tick = tick;
        }
        if let Some(seed) = self.seed {
            config.protocol.seed = seed;
        }
        if let Some(replicas) = self.replicas {
            config.protocol.replicas = replicas;
        }
        if self.no_scenario {
            config.run.scenario = false;
        }
        if self.json {
            config.output.format = OutputFormat::Json;
        }
        if let Some(record) = &self.record {
            config.output.recording = Some(record.clone());
        }
    }

    fn has_faults(&self) -> bool {
        !self.stop.is_empty() || self.drop_commits_from.is_some()
    }
}

pub fn run(project: &Path, args: &RunArgs) -> Result<()> {
    let mut config = load_config(project)?;
    args.apply_to(&mut config);
    config.validate().context("Invalid run parameters")?;

    let sim = simulate(&config, args)?;

    let report = ClusterReport::capture(&sim);
    match config.output.format {
        OutputFormat::Json => report.print_json()?,
        OutputFormat::Table => report.print_table(),
    }

    if let Some(path) = &config.output.recording {
        write_recording(&sim, path)?;
        if config.output.format == OutputFormat::Table {
            println!();
            style::print_success(&format!(
                "Recorded {} checkpoints to {}",
                sim.time_model().checkpoints().len(),
                path.display().to_string().code()
            ));
        }
    }

    Ok(())
}

/// Builds the cluster, injects faults at `args.fault_at`, and steps to the
/// configured duration.
fn simulate(config: &PbftscopeConfig, args: &RunArgs) -> Result<Simulation> {
    let tick = config.run.tick;
    let end = SimTime::from_micros(config.run.duration);

    let mut sim = Simulation::new(&config.protocol).context("Failed to build cluster")?;
    if config.run.scenario {
        sim.setup_scenario().context("Failed to set up scenario")?;
    }

    if args.has_faults() {
        let fault_at = SimTime::from_micros(args.fault_at);
        if fault_at > end {
            style::print_warn(&format!(
                "Faults at {} fall after the run ends at {}; skipping them",
                format_micros(args.fault_at),
                format_micros(config.run.duration)
            ));
            sim.run_until(end, tick)?;
            return Ok(sim);
        }
        sim.run_until(fault_at, tick)?;

        for id in &args.stop {
            let replica = ReplicaId::new(*id);
            sim.stop(replica)
                .with_context(|| format!("Failed to stop replica {replica}"))?;
            info!(%replica, time = %sim.time(), "replica stopped");
        }
    }

    match args.drop_commits_from {
        Some(id) => {
            let replica = ReplicaId::new(id);
            if sim.cluster().replica(replica).is_none() {
                bail!("Cannot drop commits from unknown replica {replica}");
            }
            loop {
                drop_commits(&mut sim, replica)?;
                if sim.time() >= end {
                    break;
                }
                let next = sim.time().after(tick).min(end);
                sim.seek(next)?;
            }
        }
        None => sim.run_until(end, tick)?,
    }

    Ok(sim)
}

/// Drops every in-flight commit sent by `replica`.
fn drop_commits(sim: &mut Simulation, replica: ReplicaId) -> Result<()> {
    let from = NodeId::Replica(replica);
    let doomed: Vec<_> = sim
        .cluster()
        .messages()
        .iter()
        .filter(|m| m.kind() == MessageKind::Commit && m.from == from)
        .map(|m| m.id)
        .collect();
    for id in doomed {
        sim.drop_message(id)
            .with_context(|| format!("Failed to drop message {id}"))?;
    }
    Ok(())
}

fn write_recording(sim: &Simulation, path: &Path) -> Result<()> {
    let bytes = if is_binary_recording(path) {
        sim.export_bytes().context("Failed to encode recording")?
    } else {
        sim.export_json()
            .context("Failed to encode recording")?
            .into_bytes()
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write recording to {}", path.display()))?;
    info!(path = %path.display(), "recording written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftscope_pbft::ReplicaStatus;

    fn args() -> RunArgs {
        RunArgs {
            duration: Some(400_000),
            tick: Some(1_000),
            seed: Some(9),
            replicas: None,
            no_scenario: false,
            stop: Vec::new(),
            drop_commits_from: None,
            fault_at: pbftscope_sim::SCENARIO_REQUEST_DELAY,
            record: None,
            json: false,
        }
    }

    fn config_for(args: &RunArgs) -> PbftscopeConfig {
        let mut config = PbftscopeConfig::default();
        config.protocol.auto_requests = false;
        args.apply_to(&mut config);
        config
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut args = args();
        args.replicas = Some(7);
        args.json = true;
        let config = config_for(&args);
        assert_eq!(config.run.duration, 400_000);
        assert_eq!(config.protocol.seed, 9);
        assert_eq!(config.protocol.replicas, 7);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn stopping_the_primary_hands_over_leadership() {
        let mut args = args();
        args.stop = vec![1];
        let sim = simulate(&config_for(&args), &args).unwrap();

        let cluster = sim.cluster();
        assert_eq!(
            cluster.replica(ReplicaId::new(1)).unwrap().status(),
            ReplicaStatus::Stopped
        );
        assert_eq!(
            cluster.primaries().map(|r| r.id()).collect::<Vec<_>>(),
            vec![ReplicaId::new(2)]
        );
    }

    #[test]
    fn commits_from_one_replica_can_be_dropped() {
        let mut args = args();
        args.drop_commits_from = Some(5);
        let sim = simulate(&config_for(&args), &args).unwrap();

        let cluster = sim.cluster();
        assert_eq!(cluster.client().unwrap().accepted().len(), 1);
        let from_five = NodeId::Replica(ReplicaId::new(5));
        assert!(
            !cluster
                .messages()
                .iter()
                .any(|m| m.kind() == MessageKind::Commit && m.from == from_five)
        );
    }

    #[test]
    fn unknown_replica_is_an_error() {
        let mut args = args();
        args.stop = vec![9];
        assert!(simulate(&config_for(&args), &args).is_err());
    }

    #[test]
    fn recording_is_written_in_either_format() {
        let dir = tempfile::tempdir().unwrap();
        let args = args();
        let sim = simulate(&config_for(&args), &args).unwrap();

        let json = dir.path().join("nested/run.json");
        write_recording(&sim, &json).unwrap();
        let text = std::fs::read_to_string(&json).unwrap();
        assert!(text.starts_with('{'));

        let bin = dir.path().join("run.bin");
        write_recording(&sim, &bin).unwrap();
        let mut restored = Simulation::new(&pbftscope_pbft::ProtocolConfig::default()).unwrap();
        restored.import_bytes(&std::fs::read(&bin).unwrap()).unwrap();
        assert_eq!(restored.max_time(), sim.max_time());
    }
}
