//! Watcher registry.
//!
//! Tracks every live per-loan subscription task so transitions can tear
//! down exactly the watchers they armed and `stop()` can tear down all of
//! them. At most one watcher per (loan, event) is armed at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinHandle};

use crate::types::{LifecycleEvent, LoanId};

struct Armed {
    token: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct Registry {
    /// Set by `cancel_all`; refuses new watchers until `reopen`.
    closed: bool,
    next_token: u64,
    loans: HashMap<LoanId, HashMap<LifecycleEvent, Armed>>,
}

#[derive(Clone, Default)]
pub struct WatcherRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a watcher unless one is already live for (`id`, `event`).
    ///
    /// `spawn` receives the registration token, which the task must pass to
    /// `release` once its event fires. Returns false when already armed or
    /// when the registry is closed; `spawn` is not called in either case.
    pub fn arm<F>(&self, id: &LoanId, event: LifecycleEvent, spawn: F) -> bool
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut reg = self.lock();
        if reg.closed {
            return false;
        }
        let live = reg
            .loans
            .get(id)
            .and_then(|events| events.get(&event))
            .is_some_and(|armed| !armed.handle.is_finished());
        if live {
            return false;
        }

        reg.next_token += 1;
        let token = reg.next_token;
        let handle = spawn(token).abort_handle();
        reg.loans
            .entry(id.clone())
            .or_default()
            .insert(event, Armed { token, handle });
        true
    }

    /// Deregister a watcher that fired, without aborting it.
    pub fn release(&self, id: &LoanId, event: LifecycleEvent, token: u64) {
        let mut reg = self.lock();
        if let Some(events) = reg.loans.get_mut(id) {
            if events.get(&event).is_some_and(|a| a.token == token) {
                events.remove(&event);
            }
            if events.is_empty() {
                reg.loans.remove(id);
            }
        }
    }

    /// Abort every watcher armed for `id`. Returns how many were cancelled.
    pub fn cancel_loan(&self, id: &LoanId) -> usize {
        let removed = self.lock().loans.remove(id);
        match removed {
            Some(events) => {
                for armed in events.values() {
                    armed.handle.abort();
                }
                events.len()
            }
            None => 0,
        }
    }

    /// Abort every armed watcher and close the registry.
    pub fn cancel_all(&self) -> usize {
        let loans = {
            let mut reg = self.lock();
            reg.closed = true;
            std::mem::take(&mut reg.loans)
        };
        let mut cancelled = 0;
        for events in loans.values() {
            for armed in events.values() {
                armed.handle.abort();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Accept new watchers again after `cancel_all`.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Events with a live watcher for `id`, sorted.
    pub fn armed(&self, id: &LoanId) -> Vec<LifecycleEvent> {
        let reg = self.lock();
        let mut events: Vec<LifecycleEvent> = reg
            .loans
            .get(id)
            .map(|events| {
                events
                    .iter()
                    .filter(|(_, a)| !a.handle.is_finished())
                    .map(|(e, _)| *e)
                    .collect()
            })
            .unwrap_or_default();
        events.sort();
        events
    }

    /// Total live watchers across all loans.
    pub fn len(&self) -> usize {
        self.lock()
            .loans
            .values()
            .flat_map(|events| events.values())
            .filter(|a| !a.handle.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
