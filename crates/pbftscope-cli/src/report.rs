//! Point-in-time summary of a simulation, shared by `run` and `replay`.

use pbftscope_pbft::{Cluster, Replica, ReplicaStatus};
use pbftscope_sim::Simulation;
use pbftscope_types::SimTime;
use serde::Serialize;

use crate::style::{self, colors::SemanticStyle};

#[derive(Debug, Serialize)]
pub struct ClusterReport {
    pub time_micros: u64,
    pub max_time_micros: u64,
    pub checkpoints: usize,
    pub replicas: Vec<ReplicaRow>,
    pub accepted: Vec<u64>,
    pub pending_request: bool,
    pub in_flight: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplicaRow {
    pub id: u8,
    pub status: &'static str,
    pub view: u64,
    pub sequence: u64,
    pub commit_index: u64,
    pub log_len: usize,
    pub view_alarm_micros: u64,
}

impl ReplicaRow {
    fn from_replica(replica: &Replica) -> Self {
        Self {
            id: replica.id().as_u8(),
            status: status_name(replica.status()),
            view: replica.view().as_u64(),
            sequence: replica.sequence_number().as_u64(),
            commit_index: replica.commit_index().as_u64(),
            log_len: replica.log().len(),
            view_alarm_micros: replica.view_alarm().as_micros(),
        }
    }
}

fn status_name(status: ReplicaStatus) -> &'static str {
    match status {
        ReplicaStatus::Follower => "follower",
        ReplicaStatus::Leader => "leader",
        ReplicaStatus::Stopped => "stopped",
    }
}

impl ClusterReport {
    pub fn capture(sim: &Simulation) -> Self {
        let cluster: &Cluster = sim.cluster();
        Self {
            time_micros: sim.time().as_micros(),
            max_time_micros: sim.max_time().as_micros(),
            checkpoints: sim.time_model().checkpoints().len(),
            replicas: cluster
                .replicas()
                .iter()
                .map(ReplicaRow::from_replica)
                .collect(),
            accepted: cluster
                .client()
                .map(|client| client.accepted().keys().map(|seq| seq.as_u64()).collect())
                .unwrap_or_default(),
            pending_request: cluster.pending_request().is_some(),
            in_flight: cluster.messages().len(),
        }
    }

    pub fn print_json(&self) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }

    pub fn print_table(&self) {
        println!(
            "{} {} {}",
            "Cluster at".header(),
            format_micros(self.time_micros).code(),
            format!(
                "(history to {}, {} checkpoints)",
                format_micros(self.max_time_micros),
                self.checkpoints
            )
            .muted()
        );
        println!();

        let rows: Vec<Vec<String>> = self
            .replicas
            .iter()
            .map(|row| {
                vec![
                    format!("S{}", row.id),
                    style::status_label(row.status),
                    row.view.to_string(),
                    row.sequence.to_string(),
                    row.commit_index.to_string(),
                    row.log_len.to_string(),
                    format_micros(row.view_alarm_micros),
                ]
            })
            .collect();
        style::print_replica_table(&rows);
        println!();

        let accepted = if self.accepted.is_empty() {
            "none".muted()
        } else {
            self.accepted
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
                .success()
        };
        style::print_labeled("Client accepted", &accepted);
        style::print_labeled(
            "Pending request",
            if self.pending_request { "yes" } else { "no" },
        );
        style::print_labeled("Messages in flight", &self.in_flight.to_string());
    }
}

/// Renders simulated microseconds as milliseconds.
pub fn format_micros(micros: u64) -> String {
    SimTime::from_micros(micros).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbftscope_pbft::ProtocolConfig;

    #[test]
    fn formats_micros_as_millis() {
        assert_eq!(format_micros(0), "0.000ms");
        assert_eq!(format_micros(10_500), "10.500ms");
        assert_eq!(format_micros(1_000_000), "1000.000ms");
    }

    #[test]
    fn capture_reports_committed_scenario() {
        let config = ProtocolConfig {
            auto_requests: false,
            ..ProtocolConfig::default()
        };
        let mut sim = Simulation::new(&config).unwrap();
        sim.setup_scenario().unwrap();
        sim.run_until(SimTime::from_micros(200_000), 1_000).unwrap();

        let report = ClusterReport::capture(&sim);
        assert_eq!(report.time_micros, 200_000);
        assert_eq!(report.replicas.len(), 5);
        assert_eq!(report.replicas[0].status, "leader");
        assert!(report.replicas.iter().all(|r| r.commit_index == 1));
        assert_eq!(report.accepted, vec![1]);
        assert!(!report.pending_request);
    }
}
