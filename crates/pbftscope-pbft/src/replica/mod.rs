//! PBFT replica state machine.
//!
//! Replicas are pure and deterministic: every handler takes an event plus a
//! [`ProtocolContext`] (current time, timings, the shared seeded RNG and
//! backoff table) and returns a [`ReplicaOutput`]. The cluster sends the
//! outgoing messages through the bus and applies the effects, which are the
//! only way a replica touches state it doesn't own.
//!
//! # Protocol Overview
//!
//! ## Normal Operation
//!
//! ```text
//! Client ──Request──► Primary
//!                       │
//!                       ├──PrePrepare──► Backups
//!                       │
//!           Replicas ◄──Prepare──► Replicas     (2f+1 matching)
//!           Replicas ◄──Commit───► Replicas     (2f+1 matching)
//!                       │
//! Client ◄──Reply───── every replica            (f+1 matching)
//! ```
//!
//! ## View Change
//!
//! ```text
//! Replica ──ViewChange(v+1)──► All   (alarm fired, primary silent)
//!           │
//!           ▼ (> N/2 votes, at primary(v+1))
//! Primary(v+1) ──NewView(v+1)──► All
//! ```

mod normal;
mod state;
mod view_change;

pub use state::*;

use pbftscope_types::{ReplicaId, SeqNumber, SimTime, ViewNumber};

use crate::backoff::ViewChangeBackoff;
use crate::client::PendingClientRequest;
use crate::config::Timings;
use crate::message::{ClientRequest, Envelope, Message};
use crate::rng::SimRng;

// ============================================================================
// Replica Output
// ============================================================================

/// Output produced by processing one event.
#[derive(Debug, Default, PartialEq)]
pub struct ReplicaOutput {
    /// Messages to enqueue on the bus, sent from this replica.
    pub messages: Vec<Envelope>,

    /// Changes to cluster-owned state.
    pub effects: Vec<Effect>,
}

impl ReplicaOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Envelope>) -> Self {
        Self {
            messages,
            effects: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.effects.is_empty()
    }

    pub fn merge(&mut self, other: ReplicaOutput) {
        self.messages.extend(other.messages);
        self.effects.extend(other.effects);
    }
}

/// Mutations of state owned by the cluster rather than the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The primary assigned `sequence` to the pending request.
    RequestOrdered { sequence: SeqNumber },

    /// A client request reached a primary; it becomes the pending request
    /// unless one is already ordered.
    RequestReceived {
        request: ClientRequest,
        process_after: SimTime,
    },

    /// `leader` became primary for `view`. Any other replica still claiming
    /// primacy steps down, and a waiting request is re-pinned to `leader`.
    LeadershipClaimed { leader: ReplicaId, view: ViewNumber },
}

// ============================================================================
// Replica Event
// ============================================================================

/// Events that can trigger replica state transitions.
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// Per-tick alarm check.
    Tick(AlarmCheck),

    /// Per-tick primary duty: order the pending request if it is ready.
    OrderPending(Option<PendingClientRequest>),

    /// A message delivered by the bus.
    Message(Message),
}

/// Cluster-wide facts a replica needs when its view-change alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmCheck {
    /// A client request is waiting for a primary.
    pub request_waiting: bool,
    /// The primary of the replica's view sent something within the activity
    /// window.
    pub primary_recently_active: bool,
}

/// Shared, cluster-owned inputs to every handler.
#[derive(Debug)]
pub struct ProtocolContext<'a> {
    pub now: SimTime,
    pub timings: &'a Timings,
    pub rng: &'a mut SimRng,
    pub backoff: &'a mut ViewChangeBackoff,
}

impl ProtocolContext<'_> {
    /// Draws the next view-change deadline for `replica`.
    pub(crate) fn next_alarm(&mut self, replica: ReplicaId) -> SimTime {
        self.backoff
            .next_alarm(replica, self.now, self.timings.view_change_timeout, self.rng)
    }
}

impl Replica {
    /// Processes one event. Stopped replicas ignore everything.
    pub fn process(&mut self, event: ReplicaEvent, ctx: &mut ProtocolContext<'_>) -> ReplicaOutput {
        if self.is_stopped() {
            return ReplicaOutput::empty();
        }

        match event {
            ReplicaEvent::Tick(check) => self.on_alarm_check(check, ctx),
            ReplicaEvent::OrderPending(pending) => match pending {
                Some(pending) => self.order_pending(&pending, ctx),
                None => ReplicaOutput::empty(),
            },
            ReplicaEvent::Message(message) => self.on_message(message, ctx),
        }
    }
}
