//! Normal-operation handlers: request intake, pre-prepare, prepare, commit,
//! and reply.

use pbftscope_types::{Digest, NodeId, ReplicaId, SeqNumber, SimTime};
use tracing::{debug, warn};

use crate::client::PendingClientRequest;
use crate::message::{
    ClientRequest, Commit, Direction, Envelope, ExecutionResult, Message, MessagePayload,
    PrePrepare, Prepare, Reply, Request,
};

use super::{Effect, LogEntry, Phase, ProtocolContext, Replica, ReplicaOutput, ReplicaStatus};

impl Replica {
    /// Routes a delivered message to its handler.
    pub(crate) fn on_message(
        &mut self,
        message: Message,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if message.direction != Direction::Request {
            return ReplicaOutput::empty();
        }
        let Some(from) = message.from_replica() else {
            return match message.payload {
                MessagePayload::ClientRequest(request) => {
                    self.on_client_request(request, message.recv_time, ctx)
                }
                _ => ReplicaOutput::empty(),
            };
        };

        match message.payload {
            MessagePayload::PrePrepare(pre_prepare) => self.on_pre_prepare(from, pre_prepare, ctx),
            MessagePayload::Prepare(prepare) => self.on_prepare(from, prepare, ctx),
            MessagePayload::Commit(commit) => self.on_commit(from, commit, ctx),
            MessagePayload::ViewChange(view_change) => {
                self.on_view_change(from, view_change.new_view, ctx)
            }
            MessagePayload::NewView(new_view) => self.on_new_view(from, new_view, ctx),
            MessagePayload::ClientRequest(_) | MessagePayload::Reply(_) => ReplicaOutput::empty(),
        }
    }

    // ========================================================================
    // Request Intake
    // ========================================================================

    /// A client request reaching the primary becomes the pending request,
    /// with a short dwell measured from its arrival.
    fn on_client_request(
        &mut self,
        request: Request,
        recv_time: SimTime,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        debug!(replica = %self.id, request = %request.request, "received client request");
        if !self.is_primary() {
            return ReplicaOutput::empty();
        }

        ReplicaOutput {
            messages: Vec::new(),
            effects: vec![Effect::RequestReceived {
                request: request.request,
                process_after: recv_time.after(ctx.timings.min_rpc_latency),
            }],
        }
    }

    // ========================================================================
    // Phase 1: Pre-prepare
    // ========================================================================

    /// Primary duty: assign the next sequence number to the pending request
    /// and broadcast it.
    pub(crate) fn order_pending(
        &mut self,
        pending: &PendingClientRequest,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if self.status != ReplicaStatus::Leader || !pending.ready_for(self.id, ctx.now) {
            return ReplicaOutput::empty();
        }

        let request = pending.request;
        let digest = request.digest();
        self.sequence_number = self.sequence_number.next();
        let sequence = self.sequence_number;

        debug!(replica = %self.id, view = %self.view, seq = %sequence, "sending pre-prepare");

        self.log.push(LogEntry {
            term: self.term,
            request,
            sequence,
            phase: Phase::PrePrepare,
        });

        let payload = MessagePayload::PrePrepare(PrePrepare {
            view: self.view,
            sequence,
            digest,
            request: Some(request),
        });
        let mut output = self.broadcast_output(&payload);
        output.effects.push(Effect::RequestOrdered { sequence });
        output
    }

    fn on_pre_prepare(
        &mut self,
        from: ReplicaId,
        pre_prepare: PrePrepare,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if from != self.primary() || pre_prepare.view != self.view {
            debug!(
                replica = %self.id,
                %from,
                view = %pre_prepare.view,
                current = %self.view,
                "ignoring pre-prepare"
            );
            return ReplicaOutput::empty();
        }

        self.reset_alarm(ctx);

        let Some(request) = pre_prepare.request else {
            warn!(replica = %self.id, %from, seq = %pre_prepare.sequence, "pre-prepare without request");
            return ReplicaOutput::empty();
        };

        self.send_prepare(pre_prepare.sequence, pre_prepare.digest, request)
    }

    // ========================================================================
    // Phase 2: Prepare
    // ========================================================================

    fn send_prepare(
        &mut self,
        sequence: SeqNumber,
        digest: Digest,
        request: ClientRequest,
    ) -> ReplicaOutput {
        debug!(replica = %self.id, seq = %sequence, "sending prepare");

        self.prepare_votes.record(sequence, self.id, digest);

        let entry = LogEntry {
            term: self.term,
            request,
            sequence,
            phase: Phase::Prepare,
        };
        match self.log.iter_mut().find(|e| e.sequence == sequence) {
            Some(existing) if existing.phase < Phase::Prepare => *existing = entry,
            Some(_) => {}
            None => self.log.push(entry),
        }

        let payload = MessagePayload::Prepare(Prepare {
            view: self.view,
            sequence,
            digest,
        });
        let mut output = self.broadcast_output(&payload);
        output.merge(self.check_prepare_quorum(sequence, digest));
        output
    }

    fn on_prepare(
        &mut self,
        from: ReplicaId,
        prepare: Prepare,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if prepare.view == self.view {
            self.reset_alarm(ctx);
            self.prepare_votes.record(prepare.sequence, from, prepare.digest);
            self.check_prepare_quorum(prepare.sequence, prepare.digest)
        } else if prepare.view > self.view {
            debug!(replica = %self.id, view = %prepare.view, "prepare from higher view");
            self.adopt_view(prepare.view, ctx);
            self.prepare_votes.reseed(prepare.sequence, from, prepare.digest);
            ReplicaOutput::empty()
        } else {
            debug!(replica = %self.id, %from, view = %prepare.view, "ignoring stale prepare");
            ReplicaOutput::empty()
        }
    }

    /// On `2f + 1` matching prepares, moves to commit. Fires once per
    /// sequence: a replica that already cast its commit vote does nothing.
    fn check_prepare_quorum(&mut self, sequence: SeqNumber, digest: Digest) -> ReplicaOutput {
        let count = self.prepare_votes.matching(sequence, digest);
        debug!(replica = %self.id, seq = %sequence, count, "prepare votes");

        if count < self.config.agreement_quorum() || self.commit_votes.has_voted(sequence, self.id)
        {
            return ReplicaOutput::empty();
        }
        self.send_commit(sequence, digest)
    }

    // ========================================================================
    // Phase 3: Commit
    // ========================================================================

    fn send_commit(&mut self, sequence: SeqNumber, digest: Digest) -> ReplicaOutput {
        debug!(replica = %self.id, seq = %sequence, "reached prepare quorum, sending commit");

        self.commit_votes.record(sequence, self.id, digest);
        if let Some(entry) = self.log.iter_mut().find(|e| e.sequence == sequence) {
            entry.phase = entry.phase.max(Phase::Commit);
        }

        let payload = MessagePayload::Commit(Commit {
            view: self.view,
            sequence,
            digest,
        });
        let mut output = self.broadcast_output(&payload);
        output.merge(self.check_commit_quorum(sequence, digest));
        output
    }

    fn on_commit(
        &mut self,
        from: ReplicaId,
        commit: Commit,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if commit.view == self.view {
            self.reset_alarm(ctx);
            self.commit_votes.record(commit.sequence, from, commit.digest);
            self.check_commit_quorum(commit.sequence, commit.digest)
        } else if commit.view > self.view {
            debug!(replica = %self.id, view = %commit.view, "commit from higher view");
            self.adopt_view(commit.view, ctx);
            self.commit_votes.reseed(commit.sequence, from, commit.digest);
            ReplicaOutput::empty()
        } else {
            debug!(replica = %self.id, %from, view = %commit.view, "ignoring stale commit");
            ReplicaOutput::empty()
        }
    }

    /// On `2f + 1` matching commits, advances the commit index and replies.
    fn check_commit_quorum(&mut self, sequence: SeqNumber, digest: Digest) -> ReplicaOutput {
        let count = self.commit_votes.matching(sequence, digest);
        debug!(replica = %self.id, seq = %sequence, count, "commit votes");

        if count < self.config.agreement_quorum() {
            return ReplicaOutput::empty();
        }
        self.commit_index = self.commit_index.max(sequence);
        self.send_reply(sequence)
    }

    // ========================================================================
    // Phase 4: Reply
    // ========================================================================

    /// Executes `sequence` and replies to the client, once per entry.
    fn send_reply(&mut self, sequence: SeqNumber) -> ReplicaOutput {
        let Some(entry) = self.log.iter_mut().find(|e| e.sequence == sequence) else {
            return ReplicaOutput::empty();
        };
        if entry.phase == Phase::Reply {
            return ReplicaOutput::empty();
        }
        entry.phase = Phase::Reply;

        debug!(replica = %self.id, seq = %sequence, "reached commit quorum, replying");

        let reply = MessagePayload::Reply(Reply {
            view: self.view,
            sequence,
            result: ExecutionResult::for_sequence(sequence),
        });
        ReplicaOutput::with_messages(vec![Envelope {
            to: NodeId::Client(self.config.client_id()),
            payload: reply,
        }])
    }
}
