//! View change protocol handlers.
//!
//! 1. **Alarm**: a replica whose alarm has fired, and that either was forced
//!    or sees a waiting request with a silent primary, moves to `v + 1` and
//!    broadcasts `ViewChange`.
//! 2. **`ViewChange`**: receivers adopt the higher view and tally votes.
//!    The rotation primary of the view becomes leader on a strict majority.
//! 3. **`NewView`**: the new primary announces itself; receivers adopt the
//!    view as followers.

use pbftscope_types::{ReplicaId, ViewNumber};
use tracing::{debug, info};

use crate::message::{MessagePayload, NewView, ViewChange};

use super::{AlarmCheck, Effect, ProtocolContext, Replica, ReplicaOutput, ReplicaStatus};

impl Replica {
    // ========================================================================
    // View Change Initiation
    // ========================================================================

    /// Runs once per tick. Does nothing until the alarm is due.
    pub(crate) fn on_alarm_check(
        &mut self,
        check: AlarmCheck,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if self.view_alarm > ctx.now {
            return ReplicaOutput::empty();
        }

        let forced = self.force_view_change;
        let primary_unresponsive =
            check.request_waiting && self.primary() != self.id && !check.primary_recently_active;

        if !forced && !primary_unresponsive {
            // Nothing suspicious; just re-arm.
            self.view_alarm = ctx.next_alarm(self.id);
            return ReplicaOutput::empty();
        }

        self.start_view_change(forced, ctx)
    }

    fn start_view_change(&mut self, forced: bool, ctx: &mut ProtocolContext<'_>) -> ReplicaOutput {
        let reason = if forced { "forced" } else { "primary unresponsive" };
        info!(replica = %self.id, view = %self.view, reason, "initiating view change");

        self.force_view_change = false;
        self.view = self.view.next();
        self.view_alarm = ctx.next_alarm(self.id);
        self.step_down();

        let payload = MessagePayload::ViewChange(ViewChange {
            new_view: self.view,
            last_sequence: self.sequence_number,
        });
        let mut output = self.broadcast_output(&payload);

        self.reset_tally();
        output.merge(self.on_view_change(self.id, self.view, ctx));
        output
    }

    // ========================================================================
    // ViewChange Handler
    // ========================================================================

    /// Tallies a vote for `new_view`, adopting it first if it is ahead.
    pub(crate) fn on_view_change(
        &mut self,
        from: ReplicaId,
        new_view: ViewNumber,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if new_view > self.view {
            info!(replica = %self.id, from = %self.view, to = %new_view, "updating view");
            self.adopt_view(new_view, ctx);
        }

        if new_view == self.view {
            self.view_change_votes.insert(from, true);
        }

        let votes = self.vote_count();
        debug!(replica = %self.id, view = %self.view, votes, "view change votes");

        if votes < self.config.view_change_majority()
            || self.primary() != self.id
            || self.status == ReplicaStatus::Leader
        {
            return ReplicaOutput::empty();
        }

        self.claim_leadership(ctx)
    }

    /// Installs this replica as primary of its view and announces it.
    fn claim_leadership(&mut self, ctx: &mut ProtocolContext<'_>) -> ReplicaOutput {
        self.install_leader();
        ctx.backoff.reset(self.id);

        let payload = MessagePayload::NewView(NewView { view: self.view });
        let mut output = self.broadcast_output(&payload);
        output.effects.push(Effect::LeadershipClaimed {
            leader: self.id,
            view: self.view,
        });
        output
    }

    // ========================================================================
    // NewView Handler
    // ========================================================================

    pub(crate) fn on_new_view(
        &mut self,
        from: ReplicaId,
        new_view: NewView,
        ctx: &mut ProtocolContext<'_>,
    ) -> ReplicaOutput {
        if from != self.config.primary_for_view(new_view.view) {
            debug!(replica = %self.id, %from, view = %new_view.view, "ignoring new-view from non-primary");
            return ReplicaOutput::empty();
        }
        if new_view.view < self.view {
            debug!(replica = %self.id, view = %new_view.view, current = %self.view, "ignoring stale new-view");
            return ReplicaOutput::empty();
        }

        self.adopt_view(new_view.view, ctx);
        if self.primary() == self.id {
            self.install_leader();
        }
        ctx.backoff.reset(self.id);
        ReplicaOutput::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ViewChangeBackoff;
    use crate::config::{ClusterConfig, Timings};
    use crate::message::MessageKind;
    use crate::rng::SimRng;
    use pbftscope_types::SimTime;

    struct Harness {
        timings: Timings,
        rng: SimRng,
        backoff: ViewChangeBackoff,
        now: SimTime,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                timings: Timings::default(),
                rng: SimRng::new(2),
                backoff: ViewChangeBackoff::new(),
                now: SimTime::ZERO,
            }
        }

        fn ctx(&mut self) -> ProtocolContext<'_> {
            ProtocolContext {
                now: self.now,
                timings: &self.timings,
                rng: &mut self.rng,
                backoff: &mut self.backoff,
            }
        }

        fn replica(&mut self, id: u8) -> Replica {
            Replica::new(ReplicaId::new(id), ClusterConfig::new(5).unwrap(), &mut self.ctx())
        }
    }

    const WAITING_SILENT: AlarmCheck = AlarmCheck {
        request_waiting: true,
        primary_recently_active: false,
    };

    #[test]
    fn alarm_not_due_does_nothing() {
        let mut h = Harness::new();
        let mut replica = h.replica(2);
        let alarm = replica.view_alarm();

        assert!(replica.on_alarm_check(WAITING_SILENT, &mut h.ctx()).is_empty());
        assert_eq!(replica.view_alarm(), alarm);
    }

    #[test]
    fn due_alarm_without_cause_rearms() {
        let mut h = Harness::new();
        let mut replica = h.replica(2);
        h.now = replica.view_alarm();

        let check = AlarmCheck {
            request_waiting: true,
            primary_recently_active: true,
        };
        assert!(replica.on_alarm_check(check, &mut h.ctx()).is_empty());
        assert_eq!(replica.view(), ViewNumber::ZERO);
        assert!(replica.view_alarm() > h.now);
    }

    #[test]
    fn silent_primary_triggers_view_change() {
        let mut h = Harness::new();
        let mut replica = h.replica(3);
        h.now = replica.view_alarm();

        let output = replica.on_alarm_check(WAITING_SILENT, &mut h.ctx());
        assert_eq!(replica.view(), ViewNumber::new(1));
        assert_eq!(output.messages.len(), 4);
        assert!(output
            .messages
            .iter()
            .all(|e| e.payload.kind() == MessageKind::ViewChange));
        assert_eq!(replica.vote_count(), 1);
    }

    #[test]
    fn primary_does_not_suspect_itself() {
        let mut h = Harness::new();
        let mut replica = h.replica(1);
        h.now = replica.view_alarm();

        assert!(replica.on_alarm_check(WAITING_SILENT, &mut h.ctx()).is_empty());
        assert_eq!(replica.view(), ViewNumber::ZERO);
    }

    #[test]
    fn forced_view_change_steps_down_and_clears_flag() {
        let mut h = Harness::new();
        let mut replica = h.replica(1);
        replica.install_leader();
        replica.force_view_change();

        let idle = AlarmCheck {
            request_waiting: false,
            primary_recently_active: true,
        };
        replica.on_alarm_check(idle, &mut h.ctx());
        assert_eq!(replica.view(), ViewNumber::new(1));
        assert_eq!(replica.status(), ReplicaStatus::Follower);
        assert!(!replica.is_force_view_change());
    }

    #[test]
    fn majority_installs_rotation_primary() {
        let mut h = Harness::new();
        let mut candidate = h.replica(2);
        let v1 = ViewNumber::new(1);

        let output = candidate.on_view_change(ReplicaId::new(3), v1, &mut h.ctx());
        assert!(output.is_empty());
        assert_eq!(candidate.vote_count(), 2);

        let output = candidate.on_view_change(ReplicaId::new(4), v1, &mut h.ctx());
        assert!(candidate.is_primary());
        assert_eq!(
            output.messages.iter().filter(|e| e.payload.kind() == MessageKind::NewView).count(),
            4
        );
        assert_eq!(
            output.effects,
            vec![Effect::LeadershipClaimed {
                leader: ReplicaId::new(2),
                view: v1
            }]
        );
        assert_eq!(h.backoff.factor(ReplicaId::new(2)), Some(1.0));

        // Later votes don't re-announce.
        let output = candidate.on_view_change(ReplicaId::new(5), v1, &mut h.ctx());
        assert!(output.is_empty());
    }

    #[test]
    fn majority_at_non_primary_does_not_lead() {
        let mut h = Harness::new();
        let mut replica = h.replica(4);
        let v1 = ViewNumber::new(1);

        for from in [1, 3, 5] {
            replica.on_view_change(ReplicaId::new(from), v1, &mut h.ctx());
        }
        assert_eq!(replica.vote_count(), 4);
        assert_eq!(replica.status(), ReplicaStatus::Follower);
    }

    #[test]
    fn votes_for_other_views_are_not_counted() {
        let mut h = Harness::new();
        let mut replica = h.replica(2);
        replica.on_view_change(ReplicaId::new(3), ViewNumber::new(6), &mut h.ctx());
        replica.on_view_change(ReplicaId::new(4), ViewNumber::new(1), &mut h.ctx());

        assert_eq!(replica.view(), ViewNumber::new(6));
        assert_eq!(replica.vote_count(), 2);
    }

    #[test]
    fn new_view_from_wrong_sender_is_ignored() {
        let mut h = Harness::new();
        let mut replica = h.replica(4);
        let before = replica.clone();

        replica.on_new_view(ReplicaId::new(3), NewView { view: ViewNumber::new(1) }, &mut h.ctx());
        assert_eq!(replica, before);
    }

    #[test]
    fn new_view_adopts_view_as_follower() {
        let mut h = Harness::new();
        let mut replica = h.replica(1);
        replica.install_leader();

        replica.on_new_view(ReplicaId::new(2), NewView { view: ViewNumber::new(1) }, &mut h.ctx());
        assert_eq!(replica.view(), ViewNumber::new(1));
        assert_eq!(replica.status(), ReplicaStatus::Follower);
        assert!(!replica.is_primary());
    }

    #[test]
    fn stale_new_view_is_ignored() {
        let mut h = Harness::new();
        let mut replica = h.replica(4);
        replica.adopt_view(ViewNumber::new(7), &mut h.ctx());
        let before = replica.clone();

        replica.on_new_view(ReplicaId::new(2), NewView { view: ViewNumber::new(1) }, &mut h.ctx());
        assert_eq!(replica, before);
    }
}
