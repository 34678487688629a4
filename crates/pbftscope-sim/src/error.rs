//! Time model error types

use pbftscope_pbft::ClusterError;
use pbftscope_types::SimTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("recording contains no checkpoints")]
    EmptyRecording,

    #[error("checkpoint {index} at {time} does not follow the previous one at {previous}")]
    UnorderedCheckpoints {
        index: usize,
        previous: SimTime,
        time: SimTime,
    },

    #[error("recording ends at {max_time} but its last checkpoint is at {last}")]
    MaxTimeBeforeHistory { max_time: SimTime, last: SimTime },

    #[error("cannot advance from {current} back to {target}; seek or rewind instead")]
    AdvanceBackwards { current: SimTime, target: SimTime },

    #[error("malformed JSON recording: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed binary recording: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("command failed: {0}")]
    Command(#[from] ClusterError),
}

pub type Result<T> = std::result::Result<T, SimError>;
