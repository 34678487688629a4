//! Replica state.
//!
//! [`Replica`] holds everything one participant knows. It is `Clone` and
//! serializable because it lives inside every checkpoint.

use std::collections::BTreeMap;

use pbftscope_types::{ReplicaId, SeqNumber, SimTime, ViewNumber};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::message::{ClientRequest, Envelope, MessagePayload};
use crate::quorum::VoteTable;

use super::{ProtocolContext, ReplicaOutput};

// ============================================================================
// Status and Log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    Follower,
    /// Primary for the current view.
    Leader,
    /// Offline. Receives nothing, sends nothing, has no alarm.
    Stopped,
}

/// How far an entry has progressed. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub request: ClientRequest,
    pub sequence: SeqNumber,
    pub phase: Phase,
}

// ============================================================================
// Replica
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub(crate) id: ReplicaId,
    pub(crate) peers: Vec<ReplicaId>,
    pub(crate) config: ClusterConfig,
    pub(crate) status: ReplicaStatus,
    pub(crate) view: ViewNumber,
    pub(crate) term: u64,
    pub(crate) log: Vec<LogEntry>,
    /// Highest sequence number this replica assigned as primary.
    pub(crate) sequence_number: SeqNumber,
    pub(crate) prepare_votes: VoteTable,
    pub(crate) commit_votes: VoteTable,
    pub(crate) commit_index: SeqNumber,
    pub(crate) view_alarm: SimTime,
    /// Votes for this replica's candidacy in its current view, keyed by
    /// every replica including itself.
    pub(crate) view_change_votes: BTreeMap<ReplicaId, bool>,
    pub(crate) force_view_change: bool,
}

impl Replica {
    /// Creates a follower in view 0 with its first alarm armed.
    pub fn new(id: ReplicaId, config: ClusterConfig, ctx: &mut ProtocolContext<'_>) -> Self {
        let peers: Vec<ReplicaId> = config.replica_ids().filter(|p| *p != id).collect();
        let mut replica = Self {
            id,
            peers,
            config,
            status: ReplicaStatus::Follower,
            view: ViewNumber::ZERO,
            term: 1,
            log: Vec::new(),
            sequence_number: SeqNumber::ZERO,
            prepare_votes: VoteTable::new(),
            commit_votes: VoteTable::new(),
            commit_index: SeqNumber::ZERO,
            view_alarm: SimTime::ZERO,
            view_change_votes: BTreeMap::new(),
            force_view_change: false,
        };
        replica.view_change_votes = replica.empty_tally();
        replica.view_alarm = ctx.next_alarm(id);
        replica
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn peers(&self) -> &[ReplicaId] {
        &self.peers
    }

    pub fn status(&self) -> ReplicaStatus {
        self.status
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn log_entry(&self, sequence: SeqNumber) -> Option<&LogEntry> {
        self.log.iter().find(|e| e.sequence == sequence)
    }

    pub fn sequence_number(&self) -> SeqNumber {
        self.sequence_number
    }

    pub fn prepare_votes(&self) -> &VoteTable {
        &self.prepare_votes
    }

    pub fn commit_votes(&self) -> &VoteTable {
        &self.commit_votes
    }

    pub fn commit_index(&self) -> SeqNumber {
        self.commit_index
    }

    pub fn view_alarm(&self) -> SimTime {
        self.view_alarm
    }

    pub fn view_change_votes(&self) -> &BTreeMap<ReplicaId, bool> {
        &self.view_change_votes
    }

    /// Number of replicas currently backing this replica's candidacy.
    pub fn vote_count(&self) -> usize {
        self.view_change_votes.values().filter(|v| **v).count()
    }

    pub fn is_force_view_change(&self) -> bool {
        self.force_view_change
    }

    pub fn is_stopped(&self) -> bool {
        self.status == ReplicaStatus::Stopped
    }

    /// Primary according to the rotation rule for this replica's view.
    pub fn primary(&self) -> ReplicaId {
        self.config.primary_for_view(self.view)
    }

    /// True iff this replica leads and the rotation rule agrees.
    pub fn is_primary(&self) -> bool {
        self.status == ReplicaStatus::Leader && self.primary() == self.id
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn empty_tally(&self) -> BTreeMap<ReplicaId, bool> {
        self.config.replica_ids().map(|r| (r, false)).collect()
    }

    /// Resets the view-change tally to a single self-vote.
    pub(crate) fn reset_tally(&mut self) {
        self.view_change_votes = self.empty_tally();
        self.view_change_votes.insert(self.id, true);
    }

    pub(crate) fn clear_certificates(&mut self) {
        self.prepare_votes.clear();
        self.commit_votes.clear();
    }

    /// Moves to `view` as a follower: re-arms the alarm, starts a fresh vote
    /// tally, and forgets quorum certificates from the old view.
    pub(crate) fn adopt_view(&mut self, view: ViewNumber, ctx: &mut ProtocolContext<'_>) {
        debug!(replica = %self.id, from = %self.view, to = %view, "adopting view");
        self.view = view;
        self.view_alarm = ctx.next_alarm(self.id);
        self.status = ReplicaStatus::Follower;
        self.reset_tally();
        self.clear_certificates();
    }

    /// Valid in-view traffic pushes the alarm out and relaxes the backoff.
    pub(crate) fn reset_alarm(&mut self, ctx: &mut ProtocolContext<'_>) {
        self.view_alarm = ctx.timings.alarm_after_traffic(ctx.now);
        ctx.backoff.decay(self.id);
    }

    /// Takes over as primary. Sequence numbers continue from the highest
    /// one this replica has seen so they stay increasing across views.
    pub(crate) fn install_leader(&mut self) {
        let highest_logged = self
            .log
            .iter()
            .map(|e| e.sequence)
            .max()
            .unwrap_or(SeqNumber::ZERO);
        self.sequence_number = self.sequence_number.max(highest_logged);
        self.status = ReplicaStatus::Leader;
        info!(replica = %self.id, view = %self.view, "became primary");
    }

    pub(crate) fn step_down(&mut self) {
        if self.status == ReplicaStatus::Leader {
            info!(replica = %self.id, view = %self.view, "stepping down");
            self.status = ReplicaStatus::Follower;
        }
    }

    pub(crate) fn stop(&mut self) {
        info!(replica = %self.id, "stopping");
        self.status = ReplicaStatus::Stopped;
        self.view_alarm = SimTime::ZERO;
    }

    /// Rejoins as a follower in `view` with empty certificates.
    pub(crate) fn rejoin(&mut self, view: ViewNumber, ctx: &mut ProtocolContext<'_>) {
        self.view = view;
        self.status = ReplicaStatus::Follower;
        self.view_alarm = ctx.next_alarm(self.id);
        self.reset_tally();
        self.clear_certificates();
    }

    /// Wipes the log and counters for a fresh scenario.
    pub(crate) fn reset_for_scenario(&mut self, view: ViewNumber, alarm: SimTime) {
        self.view = view;
        self.term = 1;
        self.log.clear();
        self.clear_certificates();
        self.sequence_number = SeqNumber::ZERO;
        self.commit_index = SeqNumber::ZERO;
        self.force_view_change = false;
        self.reset_tally();
        self.view_alarm = alarm;
        self.status = if self.primary() == self.id {
            ReplicaStatus::Leader
        } else {
            ReplicaStatus::Follower
        };
    }

    /// Snaps to `view`, leading iff the rotation picks this replica.
    pub(crate) fn align_to_view(&mut self, view: ViewNumber) {
        self.view = view;
        if self.primary() == self.id {
            self.install_leader();
        } else {
            self.status = ReplicaStatus::Follower;
        }
    }

    pub(crate) fn force_view_change(&mut self) {
        self.force_view_change = true;
        self.view_alarm = SimTime::ZERO;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// One envelope per peer.
    pub(crate) fn broadcast(&self, payload: &MessagePayload) -> Vec<Envelope> {
        self.peers
            .iter()
            .map(|peer| Envelope::to_replica(*peer, payload.clone()))
            .collect()
    }

    pub(crate) fn broadcast_output(&self, payload: &MessagePayload) -> ReplicaOutput {
        ReplicaOutput::with_messages(self.broadcast(payload))
    }
}
