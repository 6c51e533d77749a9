//! Debounce and in-progress guard for sync passes, free of timers and I/O.
//!
//! The caller owns the clock: it feeds `now` in, arms a timer for the
//! returned deadline and calls back when the timer fires.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use super::trigger::SyncTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Debouncing { deadline: Instant },
    Syncing,
}

/// What the caller has to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    None,
    /// (Re)arm the debounce timer for this deadline.
    ArmTimer(Instant),
    /// Run one pass for these reasons.
    StartPass(Vec<SyncTrigger>),
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    debounce: Duration,
    phase: Phase,
    pending: BTreeSet<SyncTrigger>,
    queued: BTreeSet<SyncTrigger>,
}

impl SyncMachine {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, phase: Phase::Idle, pending: BTreeSet::new(), queued: BTreeSet::new() }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_syncing(&self) -> bool {
        self.phase == Phase::Syncing
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Reasons collected for the next pass.
    pub fn pending(&self) -> Vec<SyncTrigger> {
        self.pending.iter().chain(self.queued.iter()).copied().collect()
    }

    /// Record a trigger. Every trigger restarts the debounce window; one
    /// arriving mid-pass waits for the window after the pass.
    pub fn trigger(&mut self, reason: SyncTrigger, now: Instant) -> SyncAction {
        match self.phase {
            Phase::Syncing => {
                self.queued.insert(reason);
                SyncAction::None
            }
            Phase::Idle | Phase::Debouncing { .. } => {
                self.pending.insert(reason);
                self.arm(now)
            }
        }
    }

    /// The debounce timer fired. Starts a pass unless the window moved or
    /// the page went offline meanwhile.
    pub fn debounce_elapsed(&mut self, now: Instant, online: bool) -> SyncAction {
        let Phase::Debouncing { deadline } = self.phase else {
            return SyncAction::None;
        };
        if now < deadline {
            return SyncAction::ArmTimer(deadline);
        }
        if !online {
            self.go_offline();
            return SyncAction::None;
        }
        self.phase = Phase::Syncing;
        SyncAction::StartPass(std::mem::take(&mut self.pending).into_iter().collect())
    }

    /// The running pass ended, successfully or not.
    pub fn pass_finished(&mut self, now: Instant) -> SyncAction {
        if self.phase != Phase::Syncing {
            return SyncAction::None;
        }
        if self.queued.is_empty() {
            self.phase = Phase::Idle;
            return SyncAction::None;
        }
        self.pending = std::mem::take(&mut self.queued);
        self.arm(now)
    }

    /// Drop everything not yet started. A running pass is left to finish.
    pub fn go_offline(&mut self) {
        self.pending.clear();
        self.queued.clear();
        if matches!(self.phase, Phase::Debouncing { .. }) {
            self.phase = Phase::Idle;
        }
    }

    fn arm(&mut self, now: Instant) -> SyncAction {
        let deadline = now + self.debounce;
        self.phase = Phase::Debouncing { deadline };
        SyncAction::ArmTimer(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_of_triggers_yields_one_pass() {
        let t0 = Instant::now();
        let mut machine = SyncMachine::new(DEBOUNCE);

        let reasons = [
            SyncTrigger::PageVisible,
            SyncTrigger::PageFocus,
            SyncTrigger::PageFocus,
            SyncTrigger::ConnectionRestored,
            SyncTrigger::UserActivity,
        ];
        let mut last = SyncAction::None;
        for (i, reason) in reasons.into_iter().enumerate() {
            last = machine.trigger(reason, t0 + ms(i as u64 * 100));
        }
        assert_eq!(last, SyncAction::ArmTimer(t0 + ms(400) + DEBOUNCE));

        // The first window has moved on, so the old timer firing does nothing.
        assert_eq!(machine.debounce_elapsed(t0 + DEBOUNCE, true), SyncAction::ArmTimer(t0 + ms(900)));

        let SyncAction::StartPass(reasons) = machine.debounce_elapsed(t0 + ms(900), true) else {
            panic!("expected a pass");
        };
        assert_eq!(reasons.len(), 4);
        assert!(machine.is_syncing());
        assert_eq!(machine.debounce_elapsed(t0 + ms(1000), true), SyncAction::None);

        assert_eq!(machine.pass_finished(t0 + ms(2000)), SyncAction::None);
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_trigger_during_pass_is_queued_for_next_window() {
        let t0 = Instant::now();
        let mut machine = SyncMachine::new(DEBOUNCE);

        machine.trigger(SyncTrigger::Periodic, t0);
        assert!(matches!(machine.debounce_elapsed(t0 + DEBOUNCE, true), SyncAction::StartPass(_)));

        assert_eq!(machine.trigger(SyncTrigger::PageFocus, t0 + ms(600)), SyncAction::None);
        assert_eq!(machine.trigger(SyncTrigger::PageVisible, t0 + ms(700)), SyncAction::None);
        assert!(machine.is_syncing());
        assert_eq!(machine.pending(), vec![SyncTrigger::PageVisible, SyncTrigger::PageFocus]);

        let done = t0 + ms(1500);
        assert_eq!(machine.pass_finished(done), SyncAction::ArmTimer(done + DEBOUNCE));
        assert_eq!(
            machine.debounce_elapsed(done + DEBOUNCE, true),
            SyncAction::StartPass(vec![SyncTrigger::PageVisible, SyncTrigger::PageFocus])
        );
    }

    #[test]
    fn test_offline_when_timer_fires_drops_reasons() {
        let t0 = Instant::now();
        let mut machine = SyncMachine::new(DEBOUNCE);
        machine.trigger(SyncTrigger::PageFocus, t0);

        assert_eq!(machine.debounce_elapsed(t0 + DEBOUNCE, false), SyncAction::None);
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(machine.pending().is_empty());
    }

    #[test]
    fn test_go_offline_keeps_running_pass() {
        let t0 = Instant::now();
        let mut machine = SyncMachine::new(DEBOUNCE);
        machine.trigger(SyncTrigger::PageFocus, t0);
        machine.debounce_elapsed(t0 + DEBOUNCE, true);
        machine.trigger(SyncTrigger::PageVisible, t0 + ms(600));

        machine.go_offline();
        assert!(machine.is_syncing());
        assert_eq!(machine.pass_finished(t0 + ms(900)), SyncAction::None);
        assert_eq!(machine.phase(), Phase::Idle);
    }
}
