//! Checkpoint, rewind, and replay.
//!
//! ```text
//!   checkpoints:  c0 ────── c1 ──── c2 ─────────── c3
//!   time:         0         t1      t2             t3 = max_time
//!                                ▲
//!                     rewind(t): clone c1, set clock to t
//!
//!   advance(t > max_time): clock = t, update, checkpoint if changed
//!   advance(t <= max_time): same as rewind(t)
//!   fork(): drop checkpoints after the current one, forget timers
//! ```
//!
//! Only state-changing steps produce checkpoints, so the state at any time
//! is the greatest checkpoint at or before it with the clock moved forward.
//! This holds because [`Model::update`] is a pure function of the snapshot:
//! a step that changed nothing would change nothing again on replay.

use pbftscope_types::SimTime;
use tracing::{debug, trace, warn};

use crate::checkpoint::{CheckpointLog, Recording};
use crate::error::{Result, SimError};
use crate::model::Model;
use crate::timers::TimerQueue;

#[derive(Debug, Clone)]
pub struct TimeModel<M: Model> {
    initial: M,
    current: M,
    log: CheckpointLog<M>,
    max_time: SimTime,
    timers: TimerQueue<M::Command>,
}

impl<M: Model> TimeModel<M> {
    /// Starts at time zero with `initial` as the first checkpoint.
    pub fn new(mut initial: M) -> Self {
        initial.set_time(SimTime::ZERO);
        Self {
            current: initial.clone(),
            log: CheckpointLog::new(initial.clone()),
            initial,
            max_time: SimTime::ZERO,
            timers: TimerQueue::new(),
        }
    }

    // ========================================================================
    // Read Access
    // ========================================================================

    pub fn current(&self) -> &M {
        &self.current
    }

    /// Direct access for administrative mutation. Call [`fork`](Self::fork)
    /// before and [`save`](Self::save) after.
    pub fn current_mut(&mut self) -> &mut M {
        &mut self.current
    }

    pub fn time(&self) -> SimTime {
        self.current.time()
    }

    /// Furthest time ever advanced to on the current branch.
    pub fn max_time(&self) -> SimTime {
        self.max_time
    }

    /// The checkpoint governing the current time.
    pub fn base(&self) -> &M {
        self.log.at(self.current.time())
    }

    pub fn checkpoints(&self) -> &[M] {
        self.log.checkpoints()
    }

    pub fn timers(&self) -> &TimerQueue<M::Command> {
        &self.timers
    }

    // ========================================================================
    // Time Control
    // ========================================================================

    /// Moves forward to `time` in a single protocol step, checkpointing if
    /// the step changed anything, then fires due timers.
    ///
    /// Recorded history is authoritative: a target at or before `max_time`
    /// is replayed from the checkpoints, and stepping past `max_time` from a
    /// rewound snapshot first catches up to the end of history.
    pub fn advance(&mut self, time: SimTime) -> Result<()> {
        let current = self.current.time();
        if time < current {
            return Err(SimError::AdvanceBackwards {
                current,
                target: time,
            });
        }
        if time <= self.max_time {
            self.rewind(time);
            return Ok(());
        }
        if current < self.max_time {
            trace!(from = %current, to = %self.max_time, "catching up to end of history");
            self.rewind(self.max_time);
        }

        self.max_time = time;
        self.current.set_time(time);
        self.current.update();
        if !self.current.same_state(self.base()) {
            trace!(%time, "state changed, checkpointing");
            self.log.push(self.current.clone());
        }

        self.run_timers(time);
        Ok(())
    }

    /// Restores the snapshot at `time` from the greatest checkpoint at or
    /// before it, then fires due timers. Does not run the protocol.
    pub fn rewind(&mut self, time: SimTime) {
        trace!(%time, "rewinding");
        self.current = self.log.at(time).clone();
        self.current.set_time(time);
        self.run_timers(time);
    }

    /// Rewinds within recorded history, advances beyond it.
    pub fn seek(&mut self, time: SimTime) -> Result<()> {
        if time <= self.max_time {
            self.rewind(time);
            Ok(())
        } else {
            self.advance(time)
        }
    }

    /// Makes the current time the end of history: later checkpoints are
    /// discarded and pending timers forgotten.
    pub fn fork(&mut self) {
        let now = self.current.time();
        let dropped = self.log.truncate_after(now);
        if dropped > 0 {
            debug!(%now, dropped, "forked history");
        }
        self.max_time = now;
        self.timers.clear();
    }

    /// Checkpoints the current snapshot. Checkpoints after the current time
    /// are discarded first so the log stays ordered.
    pub fn save(&mut self) {
        let now = self.current.time();
        self.log.truncate_after(now);
        self.log.push(self.current.clone());
        debug!(%now, checkpoints = self.log.len(), "saved checkpoint");
    }

    /// Queues `command` to run once the clock reaches `time`.
    pub fn schedule(&mut self, time: SimTime, command: M::Command) {
        debug!(%time, ?command, "scheduled");
        self.timers.schedule(time, command);
    }

    /// Back to the initial snapshot at time zero with a single checkpoint.
    pub fn clear(&mut self) {
        self.current = self.initial.clone();
        self.log = CheckpointLog::new(self.initial.clone());
        self.max_time = SimTime::ZERO;
        self.timers.clear();
    }

    /// Fires every due timer. A timer that fires branches history at `now`.
    fn run_timers(&mut self, now: SimTime) {
        let due = self.timers.take_due(now);
        if due.is_empty() {
            return;
        }

        for timer in due {
            debug!(%now, command = ?timer.command, "timer fired");
            if let Err(error) = self.current.apply(timer.command) {
                let error: SimError = error.into();
                warn!(%now, command = ?timer.command, %error, "scheduled command failed");
            }
        }

        self.log.truncate_after(now);
        self.max_time = now;
        if !self.current.same_state(self.base()) {
            self.log.push(self.current.clone());
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn export(&self) -> Recording<M> {
        Recording {
            checkpoints: self.log.checkpoints().to_vec(),
            max_time: self.max_time,
        }
    }

    /// Replaces history with `recording` and restarts at time zero from its
    /// first checkpoint. A recording that fails validation leaves the model
    /// untouched.
    pub fn import(&mut self, recording: Recording<M>) -> Result<()> {
        let log = CheckpointLog::from_checkpoints(recording.checkpoints)?;
        let last = log.last().time();
        if recording.max_time < last {
            return Err(SimError::MaxTimeBeforeHistory {
                max_time: recording.max_time,
                last,
            });
        }
        self.log = log;
        self.max_time = recording.max_time;
        self.initial = self.log.first().clone();
        self.current = self.initial.clone();
        self.current.set_time(SimTime::ZERO);
        self.timers.clear();
        debug!(checkpoints = self.log.len(), max_time = %self.max_time, "imported recording");
        Ok(())
    }

    pub fn export_json(&self) -> Result<String> {
        self.export().to_json()
    }

    pub fn import_json(&mut self, s: &str) -> Result<()> {
        self.import(Recording::from_json(s)?)
    }

    pub fn export_bytes(&self) -> Result<Vec<u8>> {
        self.export().to_bytes()
    }

    pub fn import_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.import(Recording::from_bytes(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    /// Bumps `value` once per step whenever its 10us deadline has passed.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        time: SimTime,
        armed: bool,
        value: u32,
        next_bump: SimTime,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                time: SimTime::ZERO,
                armed: true,
                value: 0,
                next_bump: SimTime::from_micros(10),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    enum CounterCommand {
        Add(u32),
        Disarm,
        Fail,
    }

    impl Model for Counter {
        type Command = CounterCommand;
        type Error = SimError;

        fn time(&self) -> SimTime {
            self.time
        }

        fn set_time(&mut self, time: SimTime) {
            self.time = time;
        }

        fn update(&mut self) {
            if self.armed && self.time >= self.next_bump {
                self.value += 1;
                self.next_bump = self.next_bump.after(10);
            }
        }

        fn apply(&mut self, command: CounterCommand) -> Result<()> {
            match command {
                CounterCommand::Add(n) => self.value += n,
                CounterCommand::Disarm => self.armed = false,
                CounterCommand::Fail => return Err(SimError::EmptyRecording),
            }
            Ok(())
        }

        fn same_state(&self, other: &Self) -> bool {
            self.armed == other.armed
                && self.value == other.value
                && self.next_bump == other.next_bump
        }
    }

    fn at(micros: u64) -> SimTime {
        SimTime::from_micros(micros)
    }

    #[test]
    fn starts_with_one_checkpoint_at_zero() {
        let model = TimeModel::new(Counter::new());
        assert_eq!(model.checkpoints().len(), 1);
        assert_eq!(model.time(), SimTime::ZERO);
        assert_eq!(model.max_time(), SimTime::ZERO);
    }

    #[test]
    fn checkpoints_only_on_change() {
        let mut model = TimeModel::new(Counter::new());
        model.advance(at(5)).unwrap();
        assert_eq!(model.checkpoints().len(), 1);

        model.advance(at(10)).unwrap();
        model.advance(at(12)).unwrap();
        model.advance(at(25)).unwrap();
        assert_eq!(model.checkpoints().len(), 3);
        assert_eq!(model.current().value, 2);
        assert_eq!(model.max_time(), at(25));

        let times: Vec<SimTime> = model.checkpoints().iter().map(Model::time).collect();
        assert_eq!(times, vec![at(0), at(10), at(25)]);
    }

    #[test]
    fn rewind_reproduces_forward_state() {
        let mut model = TimeModel::new(Counter::new());
        let mut forward = Vec::new();
        for t in (0..=60).step_by(3) {
            model.advance(at(t)).unwrap();
            forward.push(model.current().clone());
        }

        for expected in forward.iter().rev() {
            model.rewind(expected.time);
            assert_eq!(model.current(), expected);
        }
        assert_eq!(model.max_time(), at(60));
    }

    #[test]
    fn seek_dispatches_on_max_time() {
        let mut model = TimeModel::new(Counter::new());
        model.seek(at(30)).unwrap();
        assert_eq!(model.current().value, 1);

        model.seek(at(5)).unwrap();
        assert_eq!(model.current().value, 0);
        assert_eq!(model.max_time(), at(30));

        model.seek(at(45)).unwrap();
        assert_eq!(model.max_time(), at(45));
    }

    #[test]
    fn advance_backwards_is_rejected() {
        let mut model = TimeModel::new(Counter::new());
        model.advance(at(20)).unwrap();
        let err = model.advance(at(10)).unwrap_err();
        assert!(matches!(err, SimError::AdvanceBackwards { .. }));
    }

    fn assert_strictly_ordered(model: &TimeModel<Counter>) {
        let times: Vec<SimTime> = model.checkpoints().iter().map(Model::time).collect();
        assert!(
            times.windows(2).all(|pair| pair[0] < pair[1]),
            "checkpoint times out of order: {times:?}"
        );
    }

    #[test]
    fn advance_inside_history_replays_it() {
        let mut forward = TimeModel::new(Counter::new());
        for t in [30, 40, 50, 60] {
            forward.advance(at(t)).unwrap();
        }

        let mut model = TimeModel::new(Counter::new());
        for t in [30, 40, 50] {
            model.advance(at(t)).unwrap();
        }
        let checkpoints = model.checkpoints().len();

        model.rewind(at(15));
        model.advance(at(22)).unwrap();
        assert_eq!(model.current().value, 0);
        assert_eq!(model.time(), at(22));
        assert_eq!(model.max_time(), at(50));
        assert_eq!(model.checkpoints().len(), checkpoints);

        model.seek(at(45)).unwrap();
        model.seek(at(60)).unwrap();
        assert_strictly_ordered(&model);
        assert_eq!(model.max_time(), at(60));
        assert_eq!(model.current(), forward.current());
        assert_eq!(model.checkpoints(), forward.checkpoints());
    }

    #[test]
    fn advance_from_rewound_state_catches_up_first() {
        let mut model = TimeModel::new(Counter::new());
        for t in [10, 20, 30] {
            model.advance(at(t)).unwrap();
        }
        model.rewind(at(5));

        model.advance(at(40)).unwrap();
        assert_eq!(model.current().value, 4);
        assert_strictly_ordered(&model);
    }

    #[test]
    fn fork_truncates_history_and_timers() {
        let mut model = TimeModel::new(Counter::new());
        for t in [10, 20, 30, 40] {
            model.advance(at(t)).unwrap();
        }
        model.schedule(at(100), CounterCommand::Add(5));
        model.rewind(at(25));

        model.fork();
        assert_eq!(model.checkpoints().len(), 3);
        assert_eq!(model.max_time(), at(25));
        assert!(model.timers().is_empty());
    }

    #[test]
    fn admin_mutation_between_fork_and_save() {
        let mut model = TimeModel::new(Counter::new());
        model.advance(at(15)).unwrap();
        model.rewind(at(12));

        model.fork();
        model.current_mut().apply(CounterCommand::Add(10)).unwrap();
        model.save();

        assert_eq!(model.checkpoints().len(), 2);
        assert_eq!(model.base().value, 10);
        model.rewind(at(14));
        assert_eq!(model.current().value, 10);
    }

    #[test]
    fn save_at_same_time_replaces_checkpoint() {
        let mut model = TimeModel::new(Counter::new());
        model.current_mut().apply(CounterCommand::Add(1)).unwrap();
        model.save();
        model.current_mut().apply(CounterCommand::Add(1)).unwrap();
        model.save();

        assert_eq!(model.checkpoints().len(), 1);
        assert_eq!(model.checkpoints()[0].value, 2);
    }

    #[test]
    fn timers_fire_and_are_checkpointed() {
        let mut model = TimeModel::new(Counter::new());
        model.schedule(at(7), CounterCommand::Disarm);

        model.advance(at(5)).unwrap();
        assert!(model.current().armed);
        model.advance(at(8)).unwrap();
        assert!(!model.current().armed);
        assert_eq!(model.checkpoints().len(), 2);

        model.advance(at(50)).unwrap();
        assert_eq!(model.current().value, 0);

        model.rewind(at(3));
        model.seek(at(9)).unwrap();
        assert!(!model.current().armed);
    }

    #[test]
    fn failing_timer_is_skipped() {
        let mut model = TimeModel::new(Counter::new());
        model.schedule(at(1), CounterCommand::Fail);
        model.schedule(at(1), CounterCommand::Add(3));

        model.advance(at(2)).unwrap();
        assert_eq!(model.current().value, 3);
    }

    #[test]
    fn clear_returns_to_initial() {
        let mut model = TimeModel::new(Counter::new());
        model.advance(at(40)).unwrap();
        model.schedule(at(90), CounterCommand::Add(1));

        model.clear();
        assert_eq!(model.current(), &Counter::new());
        assert_eq!(model.checkpoints().len(), 1);
        assert_eq!(model.max_time(), SimTime::ZERO);
        assert!(model.timers().is_empty());
    }

    #[test]
    fn import_restarts_at_zero() {
        let mut model = TimeModel::new(Counter::new());
        for t in [10, 20, 30] {
            model.advance(at(t)).unwrap();
        }
        let json = model.export_json().unwrap();

        let mut restored = TimeModel::new(Counter::new());
        restored.schedule(at(5), CounterCommand::Add(1));
        restored.import_json(&json).unwrap();
        assert_eq!(restored.time(), SimTime::ZERO);
        assert_eq!(restored.max_time(), at(30));
        assert_eq!(restored.checkpoints(), model.checkpoints());
        assert!(restored.timers().is_empty());

        restored.seek(at(20)).unwrap();
        assert_eq!(restored.current().value, 2);
    }

    #[test]
    fn binary_export_matches_json() {
        let mut model = TimeModel::new(Counter::new());
        model.advance(at(33)).unwrap();

        let mut restored = TimeModel::new(Counter::new());
        restored.import_bytes(&model.export_bytes().unwrap()).unwrap();
        assert_eq!(restored.checkpoints(), model.checkpoints());
    }

    #[test]
    fn empty_recording_is_rejected() {
        let mut model = TimeModel::new(Counter::new());
        let err = model.import_json(r#"{"checkpoints":[],"max_time":0}"#).unwrap_err();
        assert!(matches!(err, SimError::EmptyRecording));
        assert_eq!(model.checkpoints().len(), 1);
    }

    #[test]
    fn unordered_recording_is_rejected() {
        let mut model = TimeModel::new(Counter::new());
        for t in [10, 20, 30] {
            model.advance(at(t)).unwrap();
        }
        let mut recording = model.export();
        recording.checkpoints.swap(1, 2);

        let mut restored = TimeModel::new(Counter::new());
        let err = restored.import(recording).unwrap_err();
        assert!(matches!(err, SimError::UnorderedCheckpoints { index: 2, .. }));
        assert_eq!(restored.checkpoints().len(), 1);

        let mut duplicated = model.export();
        duplicated.checkpoints.push(duplicated.checkpoints[3].clone());
        assert!(matches!(
            restored.import(duplicated),
            Err(SimError::UnorderedCheckpoints { index: 4, .. })
        ));
    }

    #[test]
    fn max_time_before_last_checkpoint_is_rejected() {
        let mut model = TimeModel::new(Counter::new());
        model.advance(at(20)).unwrap();
        let mut recording = model.export();
        recording.max_time = at(15);

        let mut restored = TimeModel::new(Counter::new());
        let err = restored.import(recording).unwrap_err();
        assert!(matches!(err, SimError::MaxTimeBeforeHistory { .. }));
        assert_eq!(restored.max_time(), SimTime::ZERO);
    }
}
