//! Vote tables for prepare and commit quorums.
//!
//! A table maps each sequence number to the digest each replica attested.
//! Keying by sender makes re-delivery idempotent: a replica that votes twice
//! for the same sequence overwrites its own entry instead of adding a vote.
//! Quorum certificates are never stored; they are counted on demand.

use std::collections::BTreeMap;

use pbftscope_types::{Digest, ReplicaId, SeqNumber};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTable {
    votes: BTreeMap<SeqNumber, BTreeMap<ReplicaId, Digest>>,
}

impl VoteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `voter`'s digest for `sequence`, replacing any earlier vote.
    pub fn record(&mut self, sequence: SeqNumber, voter: ReplicaId, digest: Digest) {
        self.votes.entry(sequence).or_default().insert(voter, digest);
    }

    /// Replaces every vote for `sequence` with a single vote from `voter`.
    pub fn reseed(&mut self, sequence: SeqNumber, voter: ReplicaId, digest: Digest) {
        let mut fresh = BTreeMap::new();
        fresh.insert(voter, digest);
        self.votes.insert(sequence, fresh);
    }

    /// Number of voters that attested exactly `digest` for `sequence`.
    pub fn matching(&self, sequence: SeqNumber, digest: Digest) -> usize {
        self.votes
            .get(&sequence)
            .map_or(0, |by_voter| by_voter.values().filter(|d| **d == digest).count())
    }

    pub fn has_voted(&self, sequence: SeqNumber, voter: ReplicaId) -> bool {
        self.votes
            .get(&sequence)
            .is_some_and(|by_voter| by_voter.contains_key(&voter))
    }

    pub fn votes_for(&self, sequence: SeqNumber) -> Option<&BTreeMap<ReplicaId, Digest>> {
        self.votes.get(&sequence)
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}
