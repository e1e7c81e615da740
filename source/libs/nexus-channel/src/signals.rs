// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Signal state tracking and observer notification for channel endpoints
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: SignalObserver, SignalWaiter
//! INVARIANTS:
//!   - Observers see the full signal set, first on registration and then on each change
//!   - Notification runs under the endpoint's queue lock; observers must not re-enter
//!     the channel

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::event::Deadline;
use crate::koid::Koid;
use crate::rights::Signals;
use crate::status::{Result, Status};

/// Receives signal changes of an endpoint.
pub trait SignalObserver: Send + Sync {
    /// Called with the endpoint's complete signal set.
    fn on_signals(&self, koid: Koid, signals: Signals);
}

pub(crate) struct SignalState {
    current: Signals,
    observers: Vec<Arc<dyn SignalObserver>>,
}

impl SignalState {
    pub(crate) fn new(initial: Signals) -> Self {
        Self { current: initial, observers: Vec::new() }
    }

    pub(crate) fn current(&self) -> Signals {
        self.current
    }

    pub(crate) fn update(&mut self, koid: Koid, clear: Signals, set: Signals) {
        let next = self.current.difference(clear).union(set);
        if next == self.current {
            return;
        }
        self.current = next;
        for observer in &self.observers {
            observer.on_signals(koid, next);
        }
    }

    pub(crate) fn add(&mut self, koid: Koid, observer: Arc<dyn SignalObserver>) {
        observer.on_signals(koid, self.current);
        self.observers.push(observer);
    }

    pub(crate) fn remove(&mut self, observer: &Arc<dyn SignalObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|existing| !Arc::ptr_eq(existing, observer));
        self.observers.len() != before
    }

    pub(crate) fn clear_observers(&mut self) {
        self.observers.clear();
    }
}

/// Observer that lets threads block until an endpoint asserts a signal.
#[derive(Default)]
pub struct SignalWaiter {
    seen: Mutex<Signals>,
    cond: Condvar,
}

impl SignalWaiter {
    /// Creates a waiter with no signals observed yet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recently observed signal set.
    pub fn signals(&self) -> Signals {
        *self.seen.lock()
    }

    /// Blocks until any of `wanted` is asserted or `deadline` passes.
    pub fn wait_for(&self, wanted: Signals, deadline: Deadline) -> Result<Signals> {
        let mut seen = self.seen.lock();
        loop {
            if seen.intersects(wanted) {
                return Ok(*seen);
            }
            match deadline.instant() {
                None => self.cond.wait(&mut seen),
                Some(when) => {
                    if self.cond.wait_until(&mut seen, when).timed_out() && !seen.intersects(wanted) {
                        return Err(Status::TimedOut);
                    }
                }
            }
        }
    }
}

impl SignalObserver for SignalWaiter {
    fn on_signals(&self, _koid: Koid, signals: Signals) {
        *self.seen.lock() = signals;
        self.cond.notify_all();
    }
}
