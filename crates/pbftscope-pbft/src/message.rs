//! PBFT protocol messages.
//!
//! ## Normal Operation
//! - [`Request`] - Client → Primary: please order this operation
//! - [`PrePrepare`] - Primary → Backups: sequence number `n` is this request
//! - [`Prepare`] - Replica → Replicas: I accept the pre-prepare for `n`
//! - [`Commit`] - Replica → Replicas: I saw a prepare quorum for `n`
//! - [`Reply`] - Replica → Client: `n` executed with this result
//!
//! ## View Change
//! - [`ViewChange`] - Replica → Replicas: I suspect the primary, move to `v + 1`
//! - [`NewView`] - New Primary → Replicas: I am primary for `v`

use std::fmt::{self, Display};

use pbftscope_types::{ClientId, Digest, MessageId, NodeId, ReplicaId, SeqNumber, SimTime, ViewNumber};
use serde::{Deserialize, Serialize};

// ============================================================================
// Message Envelope
// ============================================================================

/// Whether a message travels toward or away from the party that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Request,
    Reply,
}

/// A message on the simulated bus.
///
/// Immutable once enqueued; the only mutation the bus allows is removal
/// (delivery or drop). `recv_time >= send_time` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: NodeId,
    pub to: NodeId,
    pub direction: Direction,
    /// Informational, never used for safety.
    pub term: u64,
    pub send_time: SimTime,
    pub recv_time: SimTime,
    pub payload: MessagePayload,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Sender, if it is a replica.
    pub fn from_replica(&self) -> Option<ReplicaId> {
        self.from.as_replica()
    }

    /// Returns true if the message has arrived by `now`.
    pub fn is_due(&self, now: SimTime) -> bool {
        self.recv_time <= now
    }
}

/// An outgoing message before the bus stamps it with an ID and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: NodeId,
    pub payload: MessagePayload,
}

impl Envelope {
    pub fn to_replica(to: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            to: NodeId::Replica(to),
            payload,
        }
    }
}

// ============================================================================
// Message Payloads
// ============================================================================

/// The closed set of protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    ClientRequest(Request),
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
    ViewChange(ViewChange),
    NewView(NewView),
    Reply(Reply),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::ClientRequest(_) => MessageKind::ClientRequest,
            MessagePayload::PrePrepare(_) => MessageKind::PrePrepare,
            MessagePayload::Prepare(_) => MessageKind::Prepare,
            MessagePayload::Commit(_) => MessageKind::Commit,
            MessagePayload::ViewChange(_) => MessageKind::ViewChange,
            MessagePayload::NewView(_) => MessageKind::NewView,
            MessagePayload::Reply(_) => MessageKind::Reply,
        }
    }

    /// The view this message speaks for. For `ViewChange` this is the
    /// proposed new view.
    pub fn view(&self) -> ViewNumber {
        match self {
            MessagePayload::ClientRequest(m) => m.view,
            MessagePayload::PrePrepare(m) => m.view,
            MessagePayload::Prepare(m) => m.view,
            MessagePayload::Commit(m) => m.view,
            MessagePayload::ViewChange(m) => m.new_view,
            MessagePayload::NewView(m) => m.view,
            MessagePayload::Reply(m) => m.view,
        }
    }

    /// The sequence number, for messages that carry one.
    pub fn sequence(&self) -> Option<SeqNumber> {
        match self {
            MessagePayload::PrePrepare(m) => Some(m.sequence),
            MessagePayload::Prepare(m) => Some(m.sequence),
            MessagePayload::Commit(m) => Some(m.sequence),
            MessagePayload::Reply(m) => Some(m.sequence),
            MessagePayload::ClientRequest(_)
            | MessagePayload::ViewChange(_)
            | MessagePayload::NewView(_) => None,
        }
    }

    /// Replies flow back to the client; everything else is a request.
    pub fn direction(&self) -> Direction {
        match self {
            MessagePayload::Reply(_) => Direction::Reply,
            _ => Direction::Request,
        }
    }
}

/// Discriminant of [`MessagePayload`], used for delay tables and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ClientRequest,
    PrePrepare,
    Prepare,
    Commit,
    ViewChange,
    NewView,
    Reply,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::ClientRequest => "ClientRequest",
            MessageKind::PrePrepare => "PrePrepare",
            MessageKind::Prepare => "Prepare",
            MessageKind::Commit => "Commit",
            MessageKind::ViewChange => "ViewChange",
            MessageKind::NewView => "NewView",
            MessageKind::Reply => "Reply",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Client Requests
// ============================================================================

/// An operation issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub timestamp: SimTime,
    pub client: ClientId,
    /// Monotonic request number; the operation is `op_<n>`.
    pub operation: u64,
    /// The replica the client believed was primary when issuing.
    pub primary: ReplicaId,
}

impl ClientRequest {
    /// Placeholder digest over the request fields.
    pub fn digest(&self) -> Digest {
        Digest::of_words(&[
            self.timestamp.as_micros(),
            u64::from(self.client.as_u8()),
            self.operation,
            u64::from(self.primary.as_u8()),
        ])
    }
}

impl Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op_{}", self.operation)
    }
}

/// Client → Primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub view: ViewNumber,
    pub request: ClientRequest,
}

// ============================================================================
// Normal Operation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: ViewNumber,
    pub sequence: SeqNumber,
    pub digest: Digest,
    /// `None` models a malformed pre-prepare; receivers drop it.
    pub request: Option<ClientRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub view: ViewNumber,
    pub sequence: SeqNumber,
    pub digest: Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub view: ViewNumber,
    pub sequence: SeqNumber,
    pub digest: Digest,
}

/// Result of executing sequence number `n`. Deterministic in `n` so that
/// honest replicas always produce matching replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionResult(SeqNumber);

impl ExecutionResult {
    pub fn for_sequence(sequence: SeqNumber) -> Self {
        Self(sequence)
    }

    pub fn sequence(&self) -> SeqNumber {
        self.0
    }
}

impl Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executed_{}", self.0)
    }
}

/// Replica → Client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub view: ViewNumber,
    pub sequence: SeqNumber,
    pub result: ExecutionResult,
}

// ============================================================================
// View Change
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange {
    pub new_view: ViewNumber,
    /// Highest sequence number the sender assigned. Informational.
    pub last_sequence: SeqNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewView {
    pub view: ViewNumber,
}
