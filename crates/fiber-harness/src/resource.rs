#![forbid(unsafe_code)]

//! Keyed text data that components can suspend on.
//!
//! The first read of a missing key creates a pending [`Thenable`] and throws
//! it; the component suspends until the test resolves or rejects the key.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use fiber_core::Thenable;
use fiber_runtime::{RenderError, Throw};

#[derive(Debug, Clone)]
enum Entry {
    Pending(Thenable),
    Ready(String),
    Failed(String),
}

/// Shared cache of suspending text values. Clones share the cache.
#[derive(Debug, Clone, Default)]
pub struct TextResource {
    entries: Rc<RefCell<BTreeMap<String, Entry>>>,
}

impl TextResource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of `key`, or a throw that suspends (pending) or fails
    /// (rejected) the reading component.
    pub fn read(&self, key: &str) -> Result<String, Throw> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Pending(Thenable::new(key)));
        match entry {
            Entry::Pending(thenable) => Err(Throw::Suspend(thenable.clone())),
            Entry::Ready(value) => Ok(value.clone()),
            Entry::Failed(reason) => Err(RenderError::new(reason.as_str()).into()),
        }
    }

    /// Make `key` available without suspending.
    pub fn preload(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), Entry::Ready(value.to_owned()));
    }

    /// Settle `key` with a value and notify waiting boundaries.
    pub fn resolve(&self, key: &str, value: &str) {
        let previous = self
            .entries
            .borrow_mut()
            .insert(key.to_owned(), Entry::Ready(value.to_owned()));
        if let Some(Entry::Pending(thenable)) = previous {
            thenable.resolve();
        }
    }

    /// Settle `key` with a failure; the next read throws a render error.
    pub fn reject(&self, key: &str, reason: &str) {
        let previous = self
            .entries
            .borrow_mut()
            .insert(key.to_owned(), Entry::Failed(reason.to_owned()));
        if let Some(Entry::Pending(thenable)) = previous {
            thenable.reject(reason);
        }
    }

    /// Listeners waiting on a pending key.
    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        match self.entries.borrow().get(key) {
            Some(Entry::Pending(thenable)) => thenable.listener_count(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.entries.borrow().get(key), Some(Entry::Pending(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn missing_keys_suspend_until_resolved() {
        let resource = TextResource::new();
        let Err(Throw::Suspend(thenable)) = resource.read("user") else {
            panic!("expected suspension");
        };
        let woke = Rc::new(Cell::new(false));
        let flag = Rc::clone(&woke);
        thenable.on_settle(move || flag.set(true));
        assert_eq!(resource.listener_count("user"), 1);

        resource.resolve("user", "ada");
        assert!(woke.get());
        assert_eq!(resource.read("user").ok().as_deref(), Some("ada"));
    }

    #[test]
    fn repeated_reads_share_one_thenable() {
        let resource = TextResource::new();
        let first = resource.read("k");
        let second = resource.read("k");
        match (first, second) {
            (Err(Throw::Suspend(a)), Err(Throw::Suspend(b))) => assert_eq!(a.id(), b.id()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejected_keys_throw_errors() {
        let resource = TextResource::new();
        let _ = resource.read("k");
        resource.reject("k", "offline");
        assert!(matches!(resource.read("k"), Err(Throw::Error(e)) if e.message() == "offline"));
    }
}
