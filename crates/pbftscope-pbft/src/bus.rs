//! Simulated message bus.
//!
//! Latency is data: each message carries its `recv_time` and sits in the bus
//! until the simulation clock reaches it. Nothing is ever reordered or
//! mutated in flight; messages leave the bus only by delivery or by an
//! explicit drop.

use pbftscope_types::{MessageId, NodeId, ReplicaId, SimTime};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::Timings;
use crate::message::{Envelope, Message};
use crate::rng::SimRng;

/// Messages in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBus {
    messages: Vec<Message>,
    next_id: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `envelope` with an ID, send time, and delivery time, then
    /// enqueues it.
    ///
    /// The delivery delay is the fixed per-kind delay from `timings`, or a
    /// latency drawn from `rng` for kinds without one.
    pub fn send(
        &mut self,
        from: NodeId,
        term: u64,
        envelope: Envelope,
        now: SimTime,
        timings: &Timings,
        rng: &mut SimRng,
    ) -> MessageId {
        let kind = envelope.payload.kind();
        let delay = timings
            .delivery_delay(kind)
            .unwrap_or_else(|| rng.latency(timings.min_rpc_latency, timings.max_rpc_latency));

        let id = MessageId::from_raw(self.next_id);
        self.next_id += 1;

        let message = Message {
            id,
            from,
            to: envelope.to,
            direction: envelope.payload.direction(),
            term,
            send_time: now,
            recv_time: now.after(delay),
            payload: envelope.payload,
        };

        trace!(%id, %from, to = %message.to, %kind, recv = %message.recv_time, "enqueued");
        self.messages.push(message);
        id
    }

    /// Removes and returns every message with `recv_time <= now`, ordered by
    /// `(recv_time, id)`.
    pub fn take_due(&mut self, now: SimTime) -> Vec<Message> {
        let (mut due, keep): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| m.is_due(now));
        self.messages = keep;
        due.sort_by_key(|m| (m.recv_time, m.id));
        due
    }

    /// Removes a message without delivering it.
    pub fn drop_message(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Removes every message. IDs keep counting up.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Returns true if some in-flight message from `replica` was sent less
    /// than `window` microseconds before `now`.
    pub fn has_recent_activity(&self, replica: ReplicaId, now: SimTime, window: u64) -> bool {
        let from = NodeId::Replica(replica);
        self.messages
            .iter()
            .any(|m| m.from == from && now.since(m.send_time) < window)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
