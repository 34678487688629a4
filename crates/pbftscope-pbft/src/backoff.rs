//! Per-replica exponential backoff for view-change alarms.
//!
//! A replica that keeps timing out waits longer each time (growth 1.5×,
//! multiplier capped at 3×). Valid in-view traffic decays the factor back
//! toward 1, and installing a new primary resets it.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use pbftscope_types::{ReplicaId, SimTime};
use serde::{Deserialize, Serialize};

use crate::rng::SimRng;

const GROWTH: f64 = 1.5;
const CAP: f64 = 3.0;
const DECAY: f64 = 0.7;
const JITTER_LOW: f64 = 0.9;
const JITTER_HIGH: f64 = 1.1;

/// Backoff factor per replica. Owned by the cluster snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewChangeBackoff {
    factors: BTreeMap<ReplicaId, f64>,
}

impl ViewChangeBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the next view-change deadline for `replica` and advances its
    /// backoff.
    ///
    /// The first alarm for a replica uses the bare timeout and records a
    /// factor of 1. Later alarms multiply the timeout by the current factor
    /// (capped), then grow the factor. Both apply a jitter in `[0.9, 1.1)`.
    pub fn next_alarm(
        &mut self,
        replica: ReplicaId,
        now: SimTime,
        timeout: u64,
        rng: &mut SimRng,
    ) -> SimTime {
        let multiplier = match self.factors.entry(replica) {
            Entry::Vacant(slot) => {
                slot.insert(1.0);
                1.0
            }
            Entry::Occupied(mut slot) => {
                let factor = slot.get_mut();
                let current = factor.min(CAP);
                *factor *= GROWTH;
                current
            }
        };
        let jitter = rng.factor(JITTER_LOW..JITTER_HIGH);
        now.after((timeout as f64 * multiplier * jitter) as u64)
    }

    /// Shrinks the factor after valid traffic, never below 1.
    pub fn decay(&mut self, replica: ReplicaId) {
        if let Some(factor) = self.factors.get_mut(&replica) {
            *factor = (*factor * DECAY).max(1.0);
        }
    }

    /// Resets the factor to 1.
    pub fn reset(&mut self, replica: ReplicaId) {
        self.factors.insert(replica, 1.0);
    }

    /// Forgets every replica's history.
    pub fn clear(&mut self) {
        self.factors.clear();
    }

    pub fn factor(&self, replica: ReplicaId) -> Option<f64> {
        self.factors.get(&replica).copied()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;

    const TIMEOUT: u64 = 100_000;

    #[test]
    fn first_alarm_uses_base_timeout() {
        let mut backoff = ViewChangeBackoff::new();
        let mut rng = SimRng::new(5);
        let id = ReplicaId::new(1);

        let alarm = backoff.next_alarm(id, SimTime::ZERO, TIMEOUT, &mut rng);
        assert!((90_000..=110_000).contains(&alarm.as_micros()));
        assert_eq!(backoff.factor(id), Some(1.0));
    }

    #[test]
    fn factor_grows_and_caps() {
        let mut backoff = ViewChangeBackoff::new();
        let mut rng = SimRng::new(5);
        let id = ReplicaId::new(2);

        for _ in 0..10 {
            backoff.next_alarm(id, SimTime::ZERO, TIMEOUT, &mut rng);
        }
        // Factor keeps growing, but the multiplier applied is capped.
        assert!(backoff.factor(id).unwrap() > CAP);
        let alarm = backoff.next_alarm(id, SimTime::ZERO, TIMEOUT, &mut rng);
        assert!(alarm.as_micros() <= 330_000);
        assert!(alarm.as_micros() >= 270_000);
    }

    #[test]
    fn decay_floors_at_one() {
        let mut backoff = ViewChangeBackoff::new();
        let mut rng = SimRng::new(5);
        let id = ReplicaId::new(3);

        backoff.decay(id);
        assert_eq!(backoff.factor(id), None);

        backoff.next_alarm(id, SimTime::ZERO, TIMEOUT, &mut rng);
        backoff.next_alarm(id, SimTime::ZERO, TIMEOUT, &mut rng);
        assert_eq!(backoff.factor(id), Some(1.5));

        backoff.decay(id);
        assert!((backoff.factor(id).unwrap() - 1.05).abs() < 1e-9);
        backoff.decay(id);
        assert_eq!(backoff.factor(id), Some(1.0));

        backoff.next_alarm(id, SimTime::ZERO, TIMEOUT, &mut rng);
        backoff.reset(id);
        assert_eq!(backoff.factor(id), Some(1.0));
    }
}
