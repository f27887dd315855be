#![forbid(unsafe_code)]

//! Single-threaded settle-once completion handles.
//!
//! A component that cannot render yet throws a [`Thenable`]. The runtime
//! attaches listeners to it and schedules a retry once it settles.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THENABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a thenable, used to de-duplicate listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThenableId(u64);

impl fmt::Display for ThenableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThenableStatus {
    Pending,
    Resolved,
    Rejected(String),
}

type Listener = Box<dyn FnOnce()>;

struct Inner {
    id: ThenableId,
    label: String,
    status: RefCell<ThenableStatus>,
    listeners: RefCell<Vec<Listener>>,
}

/// A shared handle to an asynchronous dependency.
#[derive(Clone)]
pub struct Thenable {
    inner: Rc<Inner>,
}

impl fmt::Debug for Thenable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thenable")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl Default for Thenable {
    fn default() -> Self {
        Self::new("")
    }
}

impl Thenable {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(Inner {
                id: ThenableId(NEXT_THENABLE_ID.fetch_add(1, Ordering::Relaxed)),
                label: label.into(),
                status: RefCell::new(ThenableStatus::Pending),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ThenableId {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn status(&self) -> ThenableStatus {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.status.borrow(), ThenableStatus::Pending)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Run `listener` once the thenable settles; immediately if it already has.
    pub fn on_settle(&self, listener: impl FnOnce() + 'static) {
        if self.is_pending() {
            self.inner.listeners.borrow_mut().push(Box::new(listener));
        } else {
            listener();
        }
    }

    /// Settle successfully. Later calls are ignored.
    pub fn resolve(&self) {
        self.settle(ThenableStatus::Resolved);
    }

    /// Settle with a failure. Later calls are ignored.
    pub fn reject(&self, reason: impl Into<String>) {
        self.settle(ThenableStatus::Rejected(reason.into()));
    }

    fn settle(&self, status: ThenableStatus) {
        {
            let mut current = self.inner.status.borrow_mut();
            if *current != ThenableStatus::Pending {
                return;
            }
            *current = status;
        }
        // Listeners may register new listeners or settle other thenables.
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}
