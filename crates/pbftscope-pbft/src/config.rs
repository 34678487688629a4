//! Cluster shape and protocol timing parameters.

use pbftscope_types::{ClientId, ReplicaId, SimTime, ViewNumber};
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::message::MessageKind;

// ============================================================================
// Cluster Configuration
// ============================================================================

/// Smallest cluster that tolerates one Byzantine replica (`3f + 1`, `f = 1`).
pub const MIN_REPLICAS: usize = 4;

/// Largest supported cluster. Replica IDs and the client ID share a `u8`.
pub const MAX_REPLICAS: usize = 64;

/// Static shape of a PBFT cluster of `N` replicas numbered `1..=N`.
///
/// All quorum arithmetic lives here so the replica and client code never
/// recompute `f` on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawClusterConfig")]
pub struct ClusterConfig {
    replicas: u8,
}

/// Wire shape of [`ClusterConfig`]; deserialization goes through
/// [`ClusterConfig::new`] so a persisted size is range-checked.
#[derive(Deserialize)]
struct RawClusterConfig {
    replicas: u8,
}

impl TryFrom<RawClusterConfig> for ClusterConfig {
    type Error = ClusterError;

    fn try_from(raw: RawClusterConfig) -> Result<Self> {
        Self::new(usize::from(raw.replicas))
    }
}

impl ClusterConfig {
    /// Creates a configuration for `replicas` replicas.
    pub fn new(replicas: usize) -> Result<Self> {
        if !(MIN_REPLICAS..=MAX_REPLICAS).contains(&replicas) {
            return Err(ClusterError::InvalidClusterSize {
                replicas,
                min: MIN_REPLICAS,
                max: MAX_REPLICAS,
            });
        }
        Ok(Self {
            replicas: replicas as u8,
        })
    }

    /// Number of replicas `N`.
    pub fn cluster_size(&self) -> usize {
        usize::from(self.replicas)
    }

    /// Maximum tolerated faulty replicas, `f = ⌊(N - 1) / 3⌋`.
    pub fn max_faulty(&self) -> usize {
        (self.cluster_size() - 1) / 3
    }

    /// Matching prepare/commit votes needed for a phase transition (`2f + 1`).
    pub fn agreement_quorum(&self) -> usize {
        2 * self.max_faulty() + 1
    }

    /// Matching replies the client needs before accepting a result (`f + 1`).
    pub fn reply_quorum(&self) -> usize {
        self.max_faulty() + 1
    }

    /// View-change votes needed to install a new primary (strictly more than `N / 2`).
    pub fn view_change_majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// The rotation-designated primary for `view`: `(view mod N) + 1`.
    pub fn primary_for_view(&self, view: ViewNumber) -> ReplicaId {
        let offset = view.as_u64() % u64::from(self.replicas);
        ReplicaId::new(offset as u8 + 1)
    }

    /// IDs of every replica, in ascending order.
    pub fn replica_ids(&self) -> impl Iterator<Item = ReplicaId> + use<> {
        (1..=self.replicas).map(ReplicaId::new)
    }

    /// Returns true if `id` names a replica of this cluster.
    pub fn contains(&self, id: ReplicaId) -> bool {
        (1..=self.replicas).contains(&id.as_u8())
    }

    /// The client's ID, one past the last replica.
    pub fn client_id(&self) -> ClientId {
        ClientId::new(self.replicas + 1)
    }
}

// ============================================================================
// Timings
// ============================================================================

/// Protocol timing constants, all in microseconds of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Lower bound of randomly drawn network latency.
    pub min_rpc_latency: u64,
    /// Upper bound (exclusive) of randomly drawn network latency.
    pub max_rpc_latency: u64,
    /// Base view-change timeout before backoff and jitter.
    pub view_change_timeout: u64,
    /// Minimum time between automatic client requests.
    pub auto_request_interval: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            min_rpc_latency: 10_000,
            max_rpc_latency: 15_000,
            view_change_timeout: 100_000,
            auto_request_interval: 800_000,
        }
    }
}

impl Timings {
    /// Delivery delay for a message kind, as a fixed multiple of the minimum
    /// latency. `NewView` has no fixed delay and returns `None`; the bus
    /// draws a random latency for it instead.
    pub fn delivery_delay(&self, kind: MessageKind) -> Option<u64> {
        let min = self.min_rpc_latency;
        match kind {
            MessageKind::ClientRequest | MessageKind::PrePrepare => Some(min * 3 / 2),
            MessageKind::Prepare => Some(min * 2),
            MessageKind::Commit => Some(min * 5 / 2),
            MessageKind::Reply => Some(min * 3),
            MessageKind::ViewChange => Some(min * 4 / 5),
            MessageKind::NewView => None,
        }
    }

    /// Deadline set when a replica receives valid traffic for its view.
    pub fn alarm_after_traffic(&self, now: SimTime) -> SimTime {
        now.after(self.view_change_timeout * 6 / 5)
    }

    /// Window in which any message from the primary counts as "recent activity".
    pub fn activity_window(&self) -> u64 {
        self.view_change_timeout * 7 / 10
    }

    /// Minimum dwell of a freshly issued client request before the primary acts.
    pub fn request_dwell(&self) -> u64 {
        self.min_rpc_latency * 2
    }
}

// ============================================================================
// Protocol Configuration
// ============================================================================

/// Everything needed to build a fresh cluster.
///
/// Embedded by the configuration crate under the `[protocol]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Number of replicas.
    pub replicas: usize,
    /// Seed for the latency and jitter generator.
    pub seed: u64,
    /// Whether the client issues requests on its own once a primary exists.
    pub auto_requests: bool,
    pub timings: Timings,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            replicas: 5,
            seed: 0,
            auto_requests: true,
            timings: Timings::default(),
        }
    }
}

impl ProtocolConfig {
    /// Validates the replica count and returns the derived cluster shape.
    pub fn cluster(&self) -> Result<ClusterConfig> {
        ClusterConfig::new(self.replicas)
    }
}
