//! # pbftscope-types: Core types for `pbftscope`
//!
//! Shared identifiers and scalar types used across the simulator:
//! - Participant IDs ([`ReplicaId`], [`ClientId`], [`NodeId`])
//! - Protocol counters ([`ViewNumber`], [`SeqNumber`])
//! - Simulated time ([`SimTime`])
//! - Message bookkeeping ([`MessageId`], [`Digest`])
//!
//! All of these are `Copy` newtypes over small integers so they can be used
//! freely as map keys inside snapshots.

use std::fmt::{self, Display};
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

// ============================================================================
// Participant IDs
// ============================================================================

/// Identifier of a replica.
///
/// Replicas are numbered from 1, matching the rotation formula
/// `primary(v) = (v mod N) + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u8);

impl ReplicaId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Zero-based position of this replica in a cluster's replica list.
    pub fn index(self) -> usize {
        usize::from(self.0.saturating_sub(1))
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

impl From<u8> for ReplicaId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<ReplicaId> for u8 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

/// Identifier of the (single) simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u8);

impl ClientId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Endpoint of a simulated message: either a replica or the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Replica(ReplicaId),
    Client(ClientId),
}

impl NodeId {
    /// Returns the replica ID if this endpoint is a replica.
    pub fn as_replica(self) -> Option<ReplicaId> {
        match self {
            NodeId::Replica(id) => Some(id),
            NodeId::Client(_) => None,
        }
    }

    pub fn is_client(self) -> bool {
        matches!(self, NodeId::Client(_))
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Replica(id) => Display::fmt(id, f),
            NodeId::Client(id) => Display::fmt(id, f),
        }
    }
}

impl From<ReplicaId> for NodeId {
    fn from(id: ReplicaId) -> Self {
        NodeId::Replica(id)
    }
}

impl From<ClientId> for NodeId {
    fn from(id: ClientId) -> Self {
        NodeId::Client(id)
    }
}

// ============================================================================
// Protocol Counters
// ============================================================================

/// A protocol epoch. Only ever moves forward on a given replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    pub const ZERO: ViewNumber = ViewNumber(0);

    pub const fn new(view: u64) -> Self {
        Self(view)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The view that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ViewNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Sequence number assigned by a primary to a client request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SeqNumber(u64);

impl SeqNumber {
    pub const ZERO: SeqNumber = SeqNumber(0);

    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SeqNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Simulated Time
// ============================================================================

/// Simulated time in microseconds since the start of the simulation.
///
/// Latency is modeled purely as data: a message is "in flight" while the
/// current `SimTime` is below its receive time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Returns the time `delta` microseconds after this one.
    pub fn after(self, delta: u64) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// Microseconds elapsed since `earlier` (zero if `earlier` is in the future).
    pub fn since(self, earlier: SimTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Milliseconds with microsecond precision
        let millis = self.0 / 1_000;
        let micros = self.0 % 1_000;
        write!(f, "{millis}.{micros:03}ms")
    }
}

impl Add<u64> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: u64) -> Self::Output {
        self.after(rhs)
    }
}

impl Sub for SimTime {
    type Output = u64;

    fn sub(self, rhs: SimTime) -> Self::Output {
        self.since(rhs)
    }
}

impl From<u64> for SimTime {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}

impl From<SimTime> for u64 {
    fn from(time: SimTime) -> Self {
        time.0
    }
}

// ============================================================================
// Message Bookkeeping
// ============================================================================

/// Identity of a message on the simulated bus. Used to target drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Placeholder request digest.
///
/// Not a cryptographic hash: two requests with the same fields always map to
/// the same digest, which is all the quorum logic needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(u64);

impl Digest {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Folds a sequence of words into a digest (FNV-1a over little-endian bytes).
    pub fn of_words(words: &[u64]) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        for word in words {
            for byte in word.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        }
        Self(hash)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "digest_{:08x}", self.0 >> 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 0; "first replica")]
    #[test_case(5, 4; "fifth replica")]
    fn replica_index_is_zero_based(id: u8, expected: usize) {
        assert_eq!(ReplicaId::new(id).index(), expected);
    }

    #[test]
    fn view_and_sequence_advance() {
        assert_eq!(ViewNumber::ZERO.next(), ViewNumber::new(1));
        assert_eq!(SeqNumber::new(41).next(), SeqNumber::new(42));
        assert!(ViewNumber::new(3) > ViewNumber::new(2));
    }

    #[test]
    fn sim_time_arithmetic_saturates() {
        let t = SimTime::from_micros(10_000);
        assert_eq!(t + 5_000, SimTime::from_micros(15_000));
        assert_eq!(t - SimTime::from_micros(4_000), 6_000);
        assert_eq!(SimTime::ZERO - t, 0);
        assert_eq!(t.to_string(), "10.000ms");
    }

    #[test]
    fn digest_depends_on_every_word() {
        let a = Digest::of_words(&[1, 2, 3]);
        let b = Digest::of_words(&[1, 2, 3]);
        let c = Digest::of_words(&[1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn node_id_display_and_projection() {
        let replica = NodeId::from(ReplicaId::new(3));
        let client = NodeId::from(ClientId::new(6));
        assert_eq!(replica.to_string(), "S3");
        assert_eq!(client.to_string(), "C6");
        assert_eq!(replica.as_replica(), Some(ReplicaId::new(3)));
        assert!(client.is_client());
    }

    #[test]
    fn ids_serialize_as_map_keys() {
        let mut votes = std::collections::BTreeMap::new();
        votes.insert(ReplicaId::new(2), true);
        let json = serde_json::to_string(&votes).unwrap();
        let back: std::collections::BTreeMap<ReplicaId, bool> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(back, votes);
    }

    proptest::proptest! {
        #[test]
        fn sim_time_after_is_monotonic(start in 0u64..1_000_000_000, delta in 0u64..1_000_000) {
            let t = SimTime::from_micros(start);
            proptest::prop_assert!(t.after(delta) >= t);
            proptest::prop_assert_eq!(t.after(delta).since(t), delta);
        }
    }
}
