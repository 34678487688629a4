//! Seeded, snapshot-persisted randomness.
//!
//! Every random draw in the protocol (network latency for `NewView`, jitter
//! on view-change alarms) goes through [`SimRng`]. The generator's position
//! is part of the cluster snapshot, so restoring a checkpoint restores the
//! exact stream and replay reproduces the same trajectory.
//!
//! On the wire a `SimRng` is just `(seed, word_pos)`; deserializing reseeds
//! ChaCha8 and seeks to the saved position.

use std::ops::Range;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deterministic random source for the simulation.
#[derive(Debug, Clone)]
pub struct SimRng {
    seed: u64,
    inner: ChaCha8Rng,
}

impl SimRng {
    /// Creates a generator from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of 32-bit words consumed so far.
    pub fn word_pos(&self) -> u128 {
        self.inner.get_word_pos()
    }

    /// Draws a latency in microseconds from `[min, max)`.
    ///
    /// Returns `min` when the range is empty.
    pub fn latency(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.inner.gen_range(min..max)
    }

    /// Draws a multiplicative factor from `range`.
    pub fn factor(&mut self, range: Range<f64>) -> f64 {
        if range.is_empty() {
            return range.start;
        }
        self.inner.gen_range(range)
    }
}

impl PartialEq for SimRng {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.word_pos() == other.word_pos()
    }
}

// ============================================================================
// Serialization
// ============================================================================

#[derive(Serialize, Deserialize)]
struct RngState {
    seed: u64,
    word_pos: u128,
}

impl Serialize for SimRng {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RngState {
            seed: self.seed,
            word_pos: self.word_pos(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SimRng {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = RngState::deserialize(deserializer)?;
        let mut inner = ChaCha8Rng::seed_from_u64(state.seed);
        inner.set_word_pos(state.word_pos);
        Ok(Self {
            seed: state.seed,
            inner,
        })
    }
}
