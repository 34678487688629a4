//! Checkpoint log and persisted recordings.
//!
//! A checkpoint is a full clone of the snapshot. The log keeps them in
//! strictly increasing time order and is never empty once initialized.

use pbftscope_types::SimTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::model::Model;

// ============================================================================
// Checkpoint Log
// ============================================================================

#[derive(Debug, Clone)]
pub struct CheckpointLog<M> {
    checkpoints: Vec<M>,
}

impl<M: Model> CheckpointLog<M> {
    /// Starts a log whose first checkpoint is `initial`.
    pub fn new(initial: M) -> Self {
        Self {
            checkpoints: vec![initial],
        }
    }

    /// Rebuilds a log from persisted checkpoints, rejecting any that are
    /// out of time order or fail [`Model::validate`].
    pub fn from_checkpoints(checkpoints: Vec<M>) -> Result<Self> {
        if checkpoints.is_empty() {
            return Err(SimError::EmptyRecording);
        }
        for checkpoint in &checkpoints {
            if let Err(error) = checkpoint.validate() {
                return Err(error.into());
            }
        }
        for (index, pair) in checkpoints.windows(2).enumerate() {
            let (previous, time) = (pair[0].time(), pair[1].time());
            if time <= previous {
                return Err(SimError::UnorderedCheckpoints {
                    index: index + 1,
                    previous,
                    time,
                });
            }
        }
        Ok(Self { checkpoints })
    }

    /// Index of the greatest checkpoint at or before `time`. Times before
    /// the first checkpoint map to the first.
    pub fn prev(&self, time: SimTime) -> usize {
        self.checkpoints
            .partition_point(|c| c.time() <= time)
            .saturating_sub(1)
    }

    /// The checkpoint governing `time`.
    pub fn at(&self, time: SimTime) -> &M {
        &self.checkpoints[self.prev(time)]
    }

    pub fn first(&self) -> &M {
        &self.checkpoints[0]
    }

    pub fn last(&self) -> &M {
        &self.checkpoints[self.checkpoints.len() - 1]
    }

    /// Appends a checkpoint. One taken at the same time as the last replaces
    /// it, so times stay strictly increasing.
    pub fn push(&mut self, checkpoint: M) {
        debug_assert!(
            checkpoint.time() >= self.last().time(),
            "checkpoint time not monotonic: last={}, new={}",
            self.last().time(),
            checkpoint.time()
        );

        if self.last().time() == checkpoint.time() {
            self.checkpoints.pop();
        }
        self.checkpoints.push(checkpoint);
    }

    /// Drops every checkpoint after the one governing `time`.
    pub fn truncate_after(&mut self, time: SimTime) -> usize {
        let keep = self.prev(time) + 1;
        let dropped = self.checkpoints.len() - keep;
        self.checkpoints.truncate(keep);
        dropped
    }

    pub fn checkpoints(&self) -> &[M] {
        &self.checkpoints
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn into_checkpoints(self) -> Vec<M> {
        self.checkpoints
    }
}

// ============================================================================
// Recording
// ============================================================================

/// The persisted form of a time model: every checkpoint plus the furthest
/// time ever reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "M: Serialize", deserialize = "M: DeserializeOwned"))]
pub struct Recording<M> {
    pub checkpoints: Vec<M>,
    pub max_time: SimTime,
}

impl<M: Serialize + DeserializeOwned> Recording<M> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
