//! # pbftscope-sim: time travel for PBFT simulations
//!
//! Wraps a [`Model`] (in practice a [`pbftscope_pbft::Cluster`]) in a
//! [`TimeModel`] that checkpoints every state-changing step and can rewind
//! to any earlier time and replay forward to the same place.
//!
//! ## Quick Start
//!
//! ```
//! use pbftscope_pbft::ProtocolConfig;
//! use pbftscope_sim::Simulation;
//! use pbftscope_types::SimTime;
//!
//! let mut sim = Simulation::new(&ProtocolConfig::default()).unwrap();
//! sim.setup_scenario().unwrap();
//! sim.run_until(SimTime::from_micros(200_000), 1_000).unwrap();
//!
//! // Go back and look again; nothing is recomputed.
//! sim.seek(SimTime::from_micros(50_000)).unwrap();
//! assert_eq!(sim.time(), SimTime::from_micros(50_000));
//! ```
//!
//! ## Key Concepts
//!
//! - **Checkpoint**: a full clone of the snapshot, taken only when a step
//!   changed something.
//! - **`max_time`**: the furthest point reached; `seek` rewinds at or below
//!   it and advances beyond it.
//! - **Fork**: administrative commands first discard the recorded future.
//! - **Recording**: the checkpoint list plus `max_time`, as JSON or postcard.

mod checkpoint;
mod error;
mod model;
mod simulation;
mod time_model;
mod timers;

pub use checkpoint::{CheckpointLog, Recording};
pub use error::{Result, SimError};
pub use model::Model;
pub use simulation::{SCENARIO_REQUEST_DELAY, Simulation};
pub use time_model::TimeModel;
pub use timers::{Timer, TimerQueue};
