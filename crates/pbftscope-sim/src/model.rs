//! The seam between the time model and the protocol it drives.

use std::fmt::Debug;

use pbftscope_pbft::{AdminCommand, Cluster, ClusterError};
use pbftscope_types::SimTime;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SimError;

/// A snapshot the time model can checkpoint, rewind, and replay.
///
/// `update` must depend only on the snapshot (including its clock and any
/// randomness it carries). That is what makes a rewound snapshot replay to
/// the same place as forward execution.
pub trait Model: Clone + Debug + Serialize + DeserializeOwned {
    /// Externally issued mutation. Scheduled timers carry these.
    type Command: Copy + Debug + PartialEq + Serialize + DeserializeOwned;
    type Error: Into<SimError>;

    fn time(&self) -> SimTime;

    fn set_time(&mut self, time: SimTime);

    /// One protocol step at the current time.
    fn update(&mut self);

    fn apply(&mut self, command: Self::Command) -> Result<(), Self::Error>;

    /// Structural equality ignoring the clock.
    fn same_state(&self, other: &Self) -> bool;

    /// Rejects a deserialized snapshot that `update` could not run on.
    fn validate(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Model for Cluster {
    type Command = AdminCommand;
    type Error = ClusterError;

    fn time(&self) -> SimTime {
        Cluster::time(self)
    }

    fn set_time(&mut self, time: SimTime) {
        Cluster::set_time(self, time);
    }

    fn update(&mut self) {
        Cluster::update(self);
    }

    fn apply(&mut self, command: AdminCommand) -> Result<(), ClusterError> {
        self.execute(command)
    }

    fn same_state(&self, other: &Self) -> bool {
        Cluster::same_state(self, other)
    }

    fn validate(&self) -> Result<(), ClusterError> {
        Cluster::validate(self)
    }
}
