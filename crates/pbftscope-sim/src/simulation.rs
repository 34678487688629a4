//! A PBFT cluster under the time model.

use pbftscope_pbft::{AdminCommand, Cluster, ProtocolConfig};
use pbftscope_types::{MessageId, ReplicaId, SimTime};
use tracing::info;

use crate::error::Result;
use crate::model::Model;
use crate::time_model::TimeModel;

/// Delay between scenario setup and its first client request, so the reset
/// cluster is observable before traffic starts.
pub const SCENARIO_REQUEST_DELAY: u64 = 10_000;

/// The operator's handle: time control plus administrative commands, each
/// of which forks history, applies, and checkpoints.
#[derive(Debug, Clone)]
pub struct Simulation {
    model: TimeModel<Cluster>,
}

impl Simulation {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        let cluster = Cluster::new(config)?;
        info!(
            replicas = cluster.config().cluster_size(),
            max_faulty = cluster.config().max_faulty(),
            seed = config.seed,
            "simulation created"
        );
        Ok(Self {
            model: TimeModel::new(cluster),
        })
    }

    pub fn cluster(&self) -> &Cluster {
        self.model.current()
    }

    pub fn time_model(&self) -> &TimeModel<Cluster> {
        &self.model
    }

    pub fn time(&self) -> SimTime {
        self.model.time()
    }

    pub fn max_time(&self) -> SimTime {
        self.model.max_time()
    }

    // ========================================================================
    // Time Control
    // ========================================================================

    pub fn seek(&mut self, time: SimTime) -> Result<()> {
        self.model.seek(time)
    }

    pub fn advance(&mut self, time: SimTime) -> Result<()> {
        self.model.advance(time)
    }

    pub fn rewind(&mut self, time: SimTime) {
        self.model.rewind(time);
    }

    /// Steps forward in `tick` increments until `until`, landing on it
    /// exactly.
    pub fn run_until(&mut self, until: SimTime, tick: u64) -> Result<()> {
        let tick = tick.max(1);
        while self.time() < until {
            let next = self.time().after(tick).min(until);
            self.model.seek(next)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.model.clear();
    }

    // ========================================================================
    // Administrative Commands
    // ========================================================================

    /// Forks at the current time, applies `command`, and checkpoints.
    pub fn execute(&mut self, command: AdminCommand) -> Result<()> {
        self.model.fork();
        let result = self.model.current_mut().apply(command);
        self.model.save();
        result.map_err(Into::into)
    }

    pub fn stop(&mut self, replica: ReplicaId) -> Result<()> {
        self.execute(AdminCommand::Stop(replica))
    }

    pub fn resume(&mut self, replica: ReplicaId) -> Result<()> {
        self.execute(AdminCommand::Resume(replica))
    }

    pub fn restart(&mut self, replica: ReplicaId) -> Result<()> {
        self.execute(AdminCommand::Restart(replica))
    }

    pub fn resume_all(&mut self) -> Result<()> {
        self.execute(AdminCommand::ResumeAll)
    }

    pub fn force_view_change(&mut self) -> Result<()> {
        self.execute(AdminCommand::ForceViewChange)
    }

    pub fn client_request(&mut self) -> Result<()> {
        self.execute(AdminCommand::ClientRequest)
    }

    pub fn drop_message(&mut self, id: MessageId) -> Result<()> {
        self.execute(AdminCommand::Drop(id))
    }

    /// Resets to the demonstration scenario and schedules its first client
    /// request [`SCENARIO_REQUEST_DELAY`] later.
    pub fn setup_scenario(&mut self) -> Result<()> {
        self.execute(AdminCommand::SetupScenario)?;
        let at = self.time().after(SCENARIO_REQUEST_DELAY);
        self.model.schedule(at, AdminCommand::ClientRequest);
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn export_json(&self) -> Result<String> {
        self.model.export_json()
    }

    pub fn import_json(&mut self, s: &str) -> Result<()> {
        self.model.import_json(s)
    }

    pub fn export_bytes(&self) -> Result<Vec<u8>> {
        self.model.export_bytes()
    }

    pub fn import_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.model.import_bytes(bytes)
    }
}
