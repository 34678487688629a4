//! # pbftscope-pbft: PBFT protocol state machines
//!
//! A deterministic model of Practical Byzantine Fault Tolerance for a fixed
//! cluster of `N = 3f + 1` replicas and a single client. Everything a run
//! needs lives in one [`Cluster`] value: replicas, client, in-flight messages,
//! the outstanding request, the backoff table, and a seeded RNG. Advancing
//! the protocol is [`Cluster::update`], a function of that value and its
//! clock alone.
//!
//! ## Protocol Overview
//!
//! ```text
//! Client    Primary    Backup 1   Backup 2   Backup 3   Backup 4
//!   |          |          |          |          |          |
//!   |--Req---->|          |          |          |          |
//!   |          |--PrePrepare------------------------------>|
//!   |          |<-------------Prepare (all to all)-------->|
//!   |          |<-------------Commit  (all to all)-------->|
//!   |<---------Reply (every replica)------------------------|
//!   |  accept at f + 1 matching replies                     |
//! ```
//!
//! Prepare and commit certificates need `2f + 1` matching votes. A silent
//! primary with a waiting request is replaced through view change; the
//! primary of view `v` is replica `(v mod N) + 1`.
//!
//! ## Administrative Commands
//!
//! [`AdminCommand`] covers the operator's controls: stop, resume and restart
//! replicas, force a view change, issue a client request, drop a message, and
//! reset to a demonstration scenario. Time travel lives one crate up in
//! `pbftscope-sim`.

mod admin;
mod backoff;
mod bus;
mod client;
mod cluster;
mod config;
mod error;
mod message;
mod quorum;
mod replica;
mod rng;


pub use admin::AdminCommand;
pub use backoff::ViewChangeBackoff;
pub use bus::MessageBus;
pub use client::{Client, PendingClientRequest};
pub use cluster::Cluster;
pub use config::{ClusterConfig, MAX_REPLICAS, MIN_REPLICAS, ProtocolConfig, Timings};
pub use error::{ClusterError, Result};
pub use message::{
    ClientRequest, Commit, Direction, Envelope, ExecutionResult, Message, MessageKind,
    MessagePayload, NewView, PrePrepare, Prepare, Reply, Request, ViewChange,
};
pub use quorum::VoteTable;
pub use replica::{
    AlarmCheck, Effect, LogEntry, Phase, ProtocolContext, Replica, ReplicaEvent, ReplicaOutput,
    ReplicaStatus,
};
pub use rng::SimRng;
