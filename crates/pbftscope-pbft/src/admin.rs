//! Administrative operations.
//!
//! These mutate the snapshot from outside the protocol. Callers driving a
//! time model must fork before and save after each one; see
//! `pbftscope_sim::Simulation::execute`.

use pbftscope_types::{MessageId, NodeId, ReplicaId, ViewNumber};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{Client, PendingClientRequest};
use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use crate::message::{ClientRequest, Envelope, Message, MessagePayload, NewView, Request};
use crate::replica::ReplicaOutput;

/// The closed set of operations an operator (or a scheduled timer) can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminCommand {
    Stop(ReplicaId),
    Resume(ReplicaId),
    Restart(ReplicaId),
    ResumeAll,
    ForceViewChange,
    ClientRequest,
    Drop(MessageId),
    SetupScenario,
}

impl Cluster {
    /// Applies one administrative command.
    pub fn execute(&mut self, command: AdminCommand) -> Result<()> {
        match command {
            AdminCommand::Stop(id) => self.stop(id),
            AdminCommand::Resume(id) => self.resume(id),
            AdminCommand::Restart(id) => self.restart(id),
            AdminCommand::ResumeAll => {
                self.resume_all();
                Ok(())
            }
            AdminCommand::ForceViewChange => {
                self.force_view_change();
                Ok(())
            }
            AdminCommand::ClientRequest => {
                self.client_request();
                Ok(())
            }
            AdminCommand::Drop(id) => self.drop_message(id).map(|_| ()),
            AdminCommand::SetupScenario => {
                self.setup_scenario();
                Ok(())
            }
        }
    }

    fn require(&self, id: ReplicaId) -> Result<usize> {
        self.index_of(id).ok_or(ClusterError::UnknownReplica(id))
    }

    /// Takes a replica offline. Its alarm is disarmed immediately.
    pub fn stop(&mut self, id: ReplicaId) -> Result<()> {
        let index = self.require(id)?;
        self.replicas[index].stop();
        Ok(())
    }

    /// Brings a replica back at the highest active view.
    ///
    /// If it is the rotation primary of that view and no other active replica
    /// is primary, it takes over and announces itself to active peers.
    pub fn resume(&mut self, id: ReplicaId) -> Result<()> {
        let index = self.require(id)?;
        self.resume_at(index);
        Ok(())
    }

    fn resume_at(&mut self, index: usize) {
        let id = self.replicas[index].id();
        info!(replica = %id, "resuming");

        let view = self.highest_active_view();
        let primary_exists = self
            .replicas
            .iter()
            .any(|r| r.id() != id && !r.is_stopped() && r.is_primary());
        let active_peers: Vec<ReplicaId> = self
            .replicas
            .iter()
            .filter(|r| r.id() != id && !r.is_stopped())
            .map(|r| r.id())
            .collect();

        self.with_replica(index, |replica, ctx| replica.rejoin(view, ctx));

        if self.config.primary_for_view(view) == id && !primary_exists {
            self.replicas[index].install_leader();
            let payload = MessagePayload::NewView(NewView { view });
            let messages = active_peers
                .into_iter()
                .map(|peer| Envelope::to_replica(peer, payload.clone()))
                .collect();
            self.apply_output(id, ReplicaOutput::with_messages(messages));
        }
    }

    /// Stop followed by a rejoin as follower. Never claims leadership.
    pub fn restart(&mut self, id: ReplicaId) -> Result<()> {
        let index = self.require(id)?;
        self.restart_at(index);
        Ok(())
    }

    fn restart_at(&mut self, index: usize) {
        let id = self.replicas[index].id();
        info!(replica = %id, "restarting");

        self.replicas[index].stop();
        let view = self.highest_active_view();
        self.with_replica(index, |replica, ctx| {
            replica.rejoin(view, ctx);
            ctx.backoff.reset(replica.id());
        });

        info!(replica = %id, %view, "restarted as follower");
    }

    /// Resumes everyone, aligns every replica to the highest view with the
    /// rotation primary leading, and issues a fresh client request.
    pub fn resume_all(&mut self) {
        info!("resuming all replicas");
        for index in 0..self.replicas.len() {
            self.resume_at(index);
        }

        let view = self
            .replicas
            .iter()
            .map(|r| r.view())
            .max()
            .unwrap_or(ViewNumber::ZERO);
        for replica in &mut self.replicas {
            replica.align_to_view(view);
        }

        self.last_auto_request = self.time;
        self.client_request();
        let dwell = self.timings.min_rpc_latency * 5;
        if let Some(pending) = self.pending_request.as_mut() {
            pending.process_after = self.time.after(dwell);
        }
    }

    /// Makes every active replica start a view change on the next tick.
    pub fn force_view_change(&mut self) {
        info!("forcing view change");
        for replica in self.replicas.iter_mut().filter(|r| !r.is_stopped()) {
            replica.force_view_change();
        }
        self.last_auto_request = self.time;
    }

    /// Issues a client request to the believed primary.
    ///
    /// The primary is the active replica claiming leadership at the highest
    /// view, or the rotation primary of the highest view if none claims it.
    /// Returns `None` until the client exists.
    pub fn client_request(&mut self) -> Option<ClientRequest> {
        self.client.as_ref()?;

        let mut highest = ViewNumber::ZERO;
        let mut primary = None;
        for replica in self.replicas.iter().filter(|r| !r.is_stopped()) {
            if replica.is_primary() && replica.view() >= highest {
                highest = replica.view();
                primary = Some(replica.id());
            }
            highest = highest.max(replica.view());
        }
        let primary = primary.unwrap_or_else(|| self.config.primary_for_view(highest));

        let now = self.time;
        let client = self.client.as_mut()?;
        let request = client.next_request(primary, highest, now);

        let id = self.bus.send(
            NodeId::Client(client.id()),
            1,
            Envelope::to_replica(
                primary,
                MessagePayload::ClientRequest(Request {
                    view: highest,
                    request,
                }),
            ),
            now,
            &self.timings,
            &mut self.rng,
        );
        debug!(message = %id, "client request enqueued");

        self.pending_request = Some(PendingClientRequest::new(
            request,
            now.after(self.timings.request_dwell()),
        ));
        Some(request)
    }

    /// Removes an in-flight message.
    pub fn drop_message(&mut self, id: MessageId) -> Result<Message> {
        let message = self
            .bus
            .drop_message(id)
            .ok_or(ClusterError::UnknownMessage(id))?;
        info!(%id, from = %message.from, to = %message.to, kind = %message.kind(), "dropped message");
        Ok(message)
    }

    /// Resets to a clean demonstration state: nothing in flight, every
    /// replica in view 0 with the rotation primary leading, empty logs,
    /// alarms two timeouts out, and a fresh client.
    pub fn setup_scenario(&mut self) {
        info!("setting up scenario");
        self.bus.clear();
        self.pending_request = None;
        self.backoff.clear();

        for index in 0..self.replicas.len() {
            self.restart_at(index);
        }

        let alarm = self.time.after(self.timings.view_change_timeout * 2);
        for replica in &mut self.replicas {
            replica.reset_for_scenario(ViewNumber::ZERO, alarm);
        }

        self.client = Some(Client::new(&self.config));
        self.last_auto_request = self.time;
    }
}
