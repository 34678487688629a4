//! Error types for cluster construction and administrative operations.
//!
//! Protocol anomalies (stale views, non-primary senders, malformed
//! pre-prepares) are not errors: replicas log them and ignore the message.

use pbftscope_types::{MessageId, ReplicaId};
use thiserror::Error;

/// Errors returned by [`crate::Cluster`] construction and admin commands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The cluster has no replica with this ID.
    #[error("unknown replica {0}")]
    UnknownReplica(ReplicaId),

    /// No in-flight message has this ID.
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),

    /// The requested cluster size is outside the supported range.
    #[error("invalid cluster size {replicas}: expected between {min} and {max} replicas")]
    InvalidClusterSize { replicas: usize, min: usize, max: usize },

    /// A deserialized snapshot disagrees with its own cluster size.
    #[error("inconsistent snapshot: {0}")]
    InconsistentSnapshot(String),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
