//! The simulated client and its outstanding request.

use std::collections::BTreeMap;

use pbftscope_types::{ClientId, ReplicaId, SeqNumber, SimTime, ViewNumber};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::message::{ClientRequest, ExecutionResult, Reply};

// ============================================================================
// Pending Request
// ============================================================================

/// The single outstanding client request of a simulation.
///
/// `process_after` is an artificial dwell: the primary may not order the
/// request before then, so the request message is visibly delivered before
/// the pre-prepares go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClientRequest {
    pub request: ClientRequest,
    pub processed: bool,
    pub process_after: SimTime,
    /// Replica allowed to order the request. `None` lets any primary do it.
    pub primary: Option<ReplicaId>,
    /// Sequence number the primary assigned, once ordered.
    pub sequence: Option<SeqNumber>,
}

impl PendingClientRequest {
    pub fn new(request: ClientRequest, process_after: SimTime) -> Self {
        Self {
            request,
            processed: false,
            process_after,
            primary: Some(request.primary),
            sequence: None,
        }
    }

    /// Returns true if `replica` may order this request at `now`.
    pub fn ready_for(&self, replica: ReplicaId, now: SimTime) -> bool {
        !self.processed
            && now >= self.process_after
            && self.primary.is_none_or(|pinned| pinned == replica)
    }

    /// Returns true while the request still waits for a primary.
    pub fn is_waiting(&self) -> bool {
        !self.processed
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    id: ClientId,
    servers: Vec<ReplicaId>,
    current_primary: ReplicaId,
    view: ViewNumber,
    request_number: u64,
    /// Results received, per sequence number and replica.
    replies: BTreeMap<SeqNumber, BTreeMap<ReplicaId, ExecutionResult>>,
    /// Results accepted with `f + 1` matching replies.
    accepted: BTreeMap<SeqNumber, ExecutionResult>,
}

impl Client {
    /// Creates a client that initially believes replica 1 is primary in view 0.
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            id: config.client_id(),
            servers: config.replica_ids().collect(),
            current_primary: config.primary_for_view(ViewNumber::ZERO),
            view: ViewNumber::ZERO,
            request_number: 0,
            replies: BTreeMap::new(),
            accepted: BTreeMap::new(),
        }
    }

    /// Records the primary and view the client will address, and builds the
    /// next request.
    pub fn next_request(
        &mut self,
        primary: ReplicaId,
        view: ViewNumber,
        now: SimTime,
    ) -> ClientRequest {
        self.current_primary = primary;
        self.view = view;
        self.request_number += 1;

        info!(
            client = %self.id,
            request = self.request_number,
            %primary,
            %view,
            "client sending request"
        );

        ClientRequest {
            timestamp: now,
            client: self.id,
            operation: self.request_number,
            primary,
        }
    }

    /// Tallies a reply. Returns the sequence number if this reply made the
    /// result acceptable for the first time.
    pub fn on_reply(
        &mut self,
        from: ReplicaId,
        reply: Reply,
        config: &ClusterConfig,
    ) -> Option<SeqNumber> {
        debug!(client = %self.id, %from, seq = %reply.sequence, "client received reply");

        let tally = self.replies.entry(reply.sequence).or_default();
        tally.insert(from, reply.result);

        if reply.view > self.view {
            self.view = reply.view;
            self.current_primary = config.primary_for_view(reply.view);
            debug!(client = %self.id, primary = %self.current_primary, view = %self.view, "client updated primary");
        }

        if self.accepted.contains_key(&reply.sequence) {
            return None;
        }

        let mut counts: BTreeMap<ExecutionResult, usize> = BTreeMap::new();
        for result in tally.values() {
            *counts.entry(*result).or_default() += 1;
        }

        let (result, _) = counts
            .into_iter()
            .find(|(_, count)| *count >= config.reply_quorum())?;

        info!(client = %self.id, seq = %reply.sequence, %result, "client accepted result");
        self.accepted.insert(reply.sequence, result);
        Some(reply.sequence)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn servers(&self) -> &[ReplicaId] {
        &self.servers
    }

    pub fn current_primary(&self) -> ReplicaId {
        self.current_primary
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn request_number(&self) -> u64 {
        self.request_number
    }

    pub fn replies(&self) -> &BTreeMap<SeqNumber, BTreeMap<ReplicaId, ExecutionResult>> {
        &self.replies
    }

    pub fn accepted(&self) -> &BTreeMap<SeqNumber, ExecutionResult> {
        &self.accepted
    }

    pub fn accepted_result(&self, sequence: SeqNumber) -> Option<ExecutionResult> {
        self.accepted.get(&sequence).copied()
    }
}
