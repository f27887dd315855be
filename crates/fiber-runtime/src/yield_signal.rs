#![forbid(unsafe_code)]

//! Cooperative yield signals for the work loop.
//!
//! The work loop consults the signal between two units of work, never
//! before the first unit of a slice, so every call makes progress.

use std::rc::Rc;
use std::time::Duration;

use fiber_core::Clock;

use crate::policy_config::ReconcilerPolicy;

/// Decides when an interruptible render pass hands control back.
pub trait YieldSignal {
    fn should_yield(&mut self) -> bool;
}

impl<F: FnMut() -> bool> YieldSignal for F {
    fn should_yield(&mut self) -> bool {
        self()
    }
}

/// Never yields: runs every pass to completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverYield;

impl YieldSignal for NeverYield {
    fn should_yield(&mut self) -> bool {
        false
    }
}

/// Yields after a fixed number of units of work.
#[derive(Debug, Clone, Copy)]
pub struct UnitBudget {
    units: u32,
    checks: u32,
}

impl UnitBudget {
    /// Allow `units` units per slice (at least one).
    #[must_use]
    pub fn new(units: u32) -> Self {
        Self {
            units: units.max(1),
            checks: 0,
        }
    }
}

impl YieldSignal for UnitBudget {
    fn should_yield(&mut self) -> bool {
        self.checks += 1;
        self.checks >= self.units
    }
}

/// Yields once a time budget measured on a [`Clock`] runs out.
pub struct DeadlineSignal {
    clock: Rc<dyn Clock>,
    deadline: Duration,
}

impl DeadlineSignal {
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>, budget: Duration) -> Self {
        let deadline = clock.now().saturating_add(budget);
        Self { clock, deadline }
    }

    /// A slice of the policy's frame budget.
    #[must_use]
    pub fn from_policy(policy: &ReconcilerPolicy, clock: Rc<dyn Clock>) -> Self {
        Self::new(clock, Duration::from_millis(policy.scheduler.frame_budget_ms))
    }
}

impl YieldSignal for DeadlineSignal {
    fn should_yield(&mut self) -> bool {
        self.clock.now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiber_core::ManualClock;

    #[test]
    fn unit_budget_counts_checks() {
        let mut one = UnitBudget::new(1);
        assert!(one.should_yield());
        let mut three = UnitBudget::new(3);
        assert!(!three.should_yield());
        assert!(!three.should_yield());
        assert!(three.should_yield());
        let mut zero = UnitBudget::new(0);
        assert!(zero.should_yield());
    }

    #[test]
    fn deadline_tracks_clock() {
        let clock = ManualClock::new();
        let mut signal = DeadlineSignal::new(Rc::new(clock.clone()), Duration::from_millis(5));
        assert!(!signal.should_yield());
        clock.advance(Duration::from_millis(5));
        assert!(signal.should_yield());
    }

    #[test]
    fn closures_are_signals() {
        let mut calls = 0;
        let mut signal = || {
            calls += 1;
            calls > 2
        };
        assert!(!signal.should_yield());
        assert!(!signal.should_yield());
        assert!(signal.should_yield());
    }
}
