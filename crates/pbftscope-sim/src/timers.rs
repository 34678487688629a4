//! Scheduled commands.
//!
//! Timers are plain data so they survive cloning and never capture state.
//! They fire in the order they were scheduled among those due.

use pbftscope_types::SimTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer<C> {
    pub time: SimTime,
    pub command: C,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerQueue<C> {
    timers: Vec<Timer<C>>,
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self { timers: Vec::new() }
    }
}

impl<C: Copy> TimerQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, time: SimTime, command: C) {
        self.timers.push(Timer { time, command });
    }

    /// Removes and returns every timer with `time <= now`.
    pub fn take_due(&mut self, now: SimTime) -> Vec<Timer<C>> {
        let (due, pending) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| t.time <= now);
        self.timers = pending;
        due
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn pending(&self) -> &[Timer<C>] {
        &self.timers
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
