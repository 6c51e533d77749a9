//! Worker lifecycle: `Parsed -> Installing -> Installed -> Activating -> Activated`.
//!
//! A failed install or activation ends in `Redundant`. Fetches are only intercepted once the
//! worker is `Activated` and has claimed its clients.

use serde::Serialize;
use swcache_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    skip_waiting: bool,
    controlling: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { state: LifecycleState::Parsed, skip_waiting: false, controlling: false }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_waiting_skipped(&self) -> bool {
        self.skip_waiting
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    pub fn can_intercept(&self) -> bool {
        self.state == LifecycleState::Activated && self.controlling
    }

    pub fn begin_install(&mut self) -> Result<(), Error> {
        self.transition(LifecycleState::Parsed, LifecycleState::Installing)
    }

    pub fn finish_install(&mut self, succeeded: bool) -> Result<(), Error> {
        let next = if succeeded { LifecycleState::Installed } else { LifecycleState::Redundant };
        self.transition(LifecycleState::Installing, next)
    }

    /// Activate as soon as installation completes instead of waiting for old clients.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    pub fn begin_activate(&mut self) -> Result<(), Error> {
        self.transition(LifecycleState::Installed, LifecycleState::Activating)
    }

    pub fn finish_activate(&mut self) -> Result<(), Error> {
        self.transition(LifecycleState::Activating, LifecycleState::Activated)
    }

    pub fn fail_activate(&mut self) -> Result<(), Error> {
        self.transition(LifecycleState::Activating, LifecycleState::Redundant)
    }

    /// Take control of open clients. Only an activated worker can claim.
    pub fn claim(&mut self) -> Result<(), Error> {
        if self.state != LifecycleState::Activated {
            return Err(Error::InvalidInput(format!("cannot claim clients while {:?}", self.state)));
        }
        self.controlling = true;
        Ok(())
    }

    fn transition(&mut self, from: LifecycleState, to: LifecycleState) -> Result<(), Error> {
        if self.state != from {
            return Err(Error::InvalidInput(format!(
                "cannot move to {:?} from {:?} (expected {:?})",
                to, self.state, from
            )));
        }
        tracing::debug!(from = ?from, to = ?to, "lifecycle transition");
        self.state = to;
        Ok(())
    }
}
