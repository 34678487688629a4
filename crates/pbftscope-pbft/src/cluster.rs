//! The full simulation snapshot and its per-tick driver.
//!
//! [`Cluster`] owns every replica, the client, the message bus, the pending
//! request, the backoff table, and the seeded RNG. [`Cluster::update`] is a
//! pure function of this state and `time`, which is what lets the time model
//! checkpoint it and replay it.

use pbftscope_types::{ClientId, NodeId, ReplicaId, SimTime, ViewNumber};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backoff::ViewChangeBackoff;
use crate::bus::MessageBus;
use crate::client::{Client, PendingClientRequest};
use crate::config::{ClusterConfig, ProtocolConfig, Timings};
use crate::error::{ClusterError, Result};
use crate::message::{Message, MessagePayload};
use crate::replica::{
    AlarmCheck, Effect, ProtocolContext, Replica, ReplicaEvent, ReplicaOutput, ReplicaStatus,
};
use crate::rng::SimRng;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub(crate) time: SimTime,
    pub(crate) config: ClusterConfig,
    pub(crate) timings: Timings,
    pub(crate) auto_requests: bool,
    pub(crate) replicas: Vec<Replica>,
    /// Created lazily on the first update.
    pub(crate) client: Option<Client>,
    pub(crate) bus: MessageBus,
    pub(crate) pending_request: Option<PendingClientRequest>,
    pub(crate) backoff: ViewChangeBackoff,
    pub(crate) last_auto_request: SimTime,
    pub(crate) rng: SimRng,
}

impl Cluster {
    /// Builds the initial snapshot at time zero: every replica a follower in
    /// view 0, no client yet, nothing in flight.
    pub fn new(protocol: &ProtocolConfig) -> Result<Self> {
        let config = protocol.cluster()?;
        let timings = protocol.timings;
        let mut rng = SimRng::new(protocol.seed);
        let mut backoff = ViewChangeBackoff::new();

        let replicas = {
            let mut ctx = ProtocolContext {
                now: SimTime::ZERO,
                timings: &timings,
                rng: &mut rng,
                backoff: &mut backoff,
            };
            config
                .replica_ids()
                .map(|id| Replica::new(id, config, &mut ctx))
                .collect()
        };

        Ok(Self {
            time: SimTime::ZERO,
            config,
            timings,
            auto_requests: protocol.auto_requests,
            replicas,
            client: None,
            bus: MessageBus::new(),
            pending_request: None,
            backoff,
            last_auto_request: SimTime::ZERO,
            rng,
        })
    }

    // ========================================================================
    // Read Access
    // ========================================================================

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn auto_requests(&self) -> bool {
        self.auto_requests
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn replica(&self, id: ReplicaId) -> Option<&Replica> {
        self.index_of(id).map(|index| &self.replicas[index])
    }

    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn messages(&self) -> &[Message] {
        self.bus.messages()
    }

    pub fn pending_request(&self) -> Option<&PendingClientRequest> {
        self.pending_request.as_ref()
    }

    pub fn backoff(&self) -> &ViewChangeBackoff {
        &self.backoff
    }

    pub fn last_auto_request(&self) -> SimTime {
        self.last_auto_request
    }

    pub fn rng(&self) -> &SimRng {
        &self.rng
    }

    /// Replicas currently acting as primary.
    pub fn primaries(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.iter().filter(|r| r.is_primary())
    }

    /// Compares everything except the clock.
    pub fn same_state(&self, other: &Self) -> bool {
        let Self {
            time: _,
            config,
            timings,
            auto_requests,
            replicas,
            client,
            bus,
            pending_request,
            backoff,
            last_auto_request,
            rng,
        } = self;

        *config == other.config
            && *timings == other.timings
            && *auto_requests == other.auto_requests
            && *replicas == other.replicas
            && *client == other.client
            && *bus == other.bus
            && *pending_request == other.pending_request
            && *backoff == other.backoff
            && *last_auto_request == other.last_auto_request
            && *rng == other.rng
    }

    /// Checks that a snapshot built outside [`Cluster::new`] is internally
    /// consistent: one replica per configured ID, in ID order, each sharing
    /// the cluster's configuration.
    pub fn validate(&self) -> Result<()> {
        let expected = self.config.cluster_size();
        if self.replicas.len() != expected {
            return Err(ClusterError::InconsistentSnapshot(format!(
                "{} replicas for a cluster of {expected}",
                self.replicas.len()
            )));
        }
        for (replica, id) in self.replicas.iter().zip(self.config.replica_ids()) {
            if replica.id != id {
                return Err(ClusterError::InconsistentSnapshot(format!(
                    "replica {} stored in slot {id}",
                    replica.id
                )));
            }
            if replica.config != self.config {
                return Err(ClusterError::InconsistentSnapshot(format!(
                    "replica {id} configured for {} replicas",
                    replica.config.cluster_size()
                )));
            }
            if replica.peers.iter().any(|peer| !self.config.contains(*peer)) {
                return Err(ClusterError::InconsistentSnapshot(format!(
                    "replica {id} lists a peer outside the cluster"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn index_of(&self, id: ReplicaId) -> Option<usize> {
        self.config.contains(id).then(|| id.index())
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Advances the protocol by one step at the current time.
    ///
    /// Order within a step: create the client if missing, maybe issue an
    /// automatic request, then for each replica in ID order check its alarm
    /// and (if leading) order the pending request, and finally deliver every
    /// due message. Messages sent during this step are never delivered in it
    /// unless their delay is zero.
    pub fn update(&mut self) {
        if self.client.is_none() {
            self.client = Some(Client::new(&self.config));
        }

        self.maybe_auto_request();

        for index in 0..self.replicas.len() {
            let check = self.alarm_check(index);
            self.step(index, ReplicaEvent::Tick(check));

            if self.replicas[index].status() == ReplicaStatus::Leader {
                let pending = self.pending_request;
                self.step(index, ReplicaEvent::OrderPending(pending));
            }
        }

        for message in self.bus.take_due(self.time) {
            self.deliver(message);
        }
    }

    fn maybe_auto_request(&mut self) {
        if !self.auto_requests || self.pending_request.is_some() || self.client.is_none() {
            return;
        }
        if self.time.since(self.last_auto_request) <= self.timings.auto_request_interval {
            return;
        }
        if self.primaries().next().is_none() {
            return;
        }

        self.last_auto_request = self.time;
        self.client_request();
    }

    fn alarm_check(&self, index: usize) -> AlarmCheck {
        let replica = &self.replicas[index];
        AlarmCheck {
            request_waiting: self.pending_request.is_some_and(|p| p.is_waiting()),
            primary_recently_active: self.bus.has_recent_activity(
                replica.primary(),
                self.time,
                self.timings.activity_window(),
            ),
        }
    }

    fn deliver(&mut self, message: Message) {
        trace!(id = %message.id, from = %message.from, to = %message.to, kind = %message.kind(), "delivering");
        match message.to {
            NodeId::Replica(id) => {
                if let Some(index) = self.index_of(id) {
                    self.step(index, ReplicaEvent::Message(message));
                }
            }
            NodeId::Client(id) => self.deliver_to_client(id, message),
        }
    }

    fn deliver_to_client(&mut self, id: ClientId, message: Message) {
        let Some(client) = self.client.as_mut().filter(|c| c.id() == id) else {
            return;
        };
        let (Some(from), MessagePayload::Reply(reply)) = (message.from_replica(), message.payload)
        else {
            return;
        };

        let Some(accepted) = client.on_reply(from, reply, &self.config) else {
            return;
        };
        if self
            .pending_request
            .is_some_and(|p| p.sequence == Some(accepted))
        {
            debug!(seq = %accepted, "pending request completed");
            self.pending_request = None;
        }
    }

    // ========================================================================
    // Replica Plumbing
    // ========================================================================

    /// Runs `f` against one replica with a context borrowed from the cluster.
    pub(crate) fn with_replica<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Replica, &mut ProtocolContext<'_>) -> R,
    ) -> R {
        let mut ctx = ProtocolContext {
            now: self.time,
            timings: &self.timings,
            rng: &mut self.rng,
            backoff: &mut self.backoff,
        };
        f(&mut self.replicas[index], &mut ctx)
    }

    fn step(&mut self, index: usize, event: ReplicaEvent) {
        let output = self.with_replica(index, |replica, ctx| replica.process(event, ctx));
        let from = self.replicas[index].id();
        self.apply_output(from, output);
    }

    /// Sends a replica's messages and applies its effects.
    pub(crate) fn apply_output(&mut self, from: ReplicaId, output: ReplicaOutput) {
        let term = self.replica(from).map_or(1, Replica::term);
        for envelope in output.messages {
            self.bus.send(
                NodeId::Replica(from),
                term,
                envelope,
                self.time,
                &self.timings,
                &mut self.rng,
            );
        }
        for effect in output.effects {
            self.apply_effect(effect);
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::RequestOrdered { sequence } => {
                if let Some(pending) = self.pending_request.as_mut() {
                    pending.processed = true;
                    pending.sequence = Some(sequence);
                }
            }
            Effect::RequestReceived {
                request,
                process_after,
            } => {
                if self.pending_request.is_some_and(|p| p.processed) {
                    return;
                }
                // A request the cluster already re-pinned keeps its pin.
                let primary = match self.pending_request {
                    Some(p) if p.request == request => p.primary,
                    _ => Some(request.primary),
                };
                self.pending_request = Some(PendingClientRequest {
                    request,
                    processed: false,
                    process_after,
                    primary,
                    sequence: None,
                });
            }
            Effect::LeadershipClaimed { leader, view } => {
                for replica in &mut self.replicas {
                    if replica.id() != leader && replica.status() == ReplicaStatus::Leader {
                        debug!(replica = %replica.id(), %leader, %view, "forcing competing primary to step down");
                        replica.step_down();
                    }
                }
                if let Some(pending) = self.pending_request.as_mut().filter(|p| p.is_waiting()) {
                    pending.primary = Some(leader);
                }
            }
        }
    }

    /// Highest view among replicas that are not stopped.
    pub(crate) fn highest_active_view(&self) -> ViewNumber {
        self.replicas
            .iter()
            .filter(|r| !r.is_stopped())
            .map(Replica::view)
            .max()
            .unwrap_or(ViewNumber::ZERO)
    }
}
