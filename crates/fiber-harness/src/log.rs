#![forbid(unsafe_code)]

//! A shared render log and yield signals driven by it.
//!
//! Components push a line when they render or run an effect. Tests then
//! assert on the exact order, or drive work until a given line appears.

use std::cell::RefCell;
use std::rc::Rc;

use fiber_runtime::YieldSignal;

/// Append-only log shared between a test and its components.
#[derive(Debug, Clone, Default)]
pub struct YieldLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl YieldLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    /// Drain and return everything logged so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[must_use]
    pub fn contains(&self, entry: &str) -> bool {
        self.entries.borrow().iter().any(|e| e == entry)
    }
}

/// Yields once the log holds `count` entries.
#[derive(Debug, Clone)]
pub struct UntilLogged {
    log: YieldLog,
    count: usize,
}

impl UntilLogged {
    #[must_use]
    pub fn new(log: &YieldLog, count: usize) -> Self {
        Self {
            log: log.clone(),
            count,
        }
    }
}

impl YieldSignal for UntilLogged {
    fn should_yield(&mut self) -> bool {
        self.log.len() >= self.count
    }
}

/// Yields once `entry` has been logged.
#[derive(Debug, Clone)]
pub struct UntilEntry {
    log: YieldLog,
    entry: String,
}

impl UntilEntry {
    #[must_use]
    pub fn new(log: &YieldLog, entry: impl Into<String>) -> Self {
        Self {
            log: log.clone(),
            entry: entry.into(),
        }
    }
}

impl YieldSignal for UntilEntry {
    fn should_yield(&mut self) -> bool {
        self.log.contains(&self.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_in_order() {
        let log = YieldLog::new();
        log.push("a");
        log.clone().push("b");
        assert_eq!(log.take(), vec!["a", "b"]);
        assert!(log.is_empty());
    }

    #[test]
    fn signals_follow_the_log() {
        let log = YieldLog::new();
        let mut count = UntilLogged::new(&log, 2);
        let mut entry = UntilEntry::new(&log, "B");
        log.push("A");
        assert!(!count.should_yield());
        assert!(!entry.should_yield());
        log.push("B");
        assert!(count.should_yield());
        assert!(entry.should_yield());
    }
}
