// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hosted blocking primitive used by call waiters
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Event, Deadline, WaitResult
//! DEPENDS_ON: parking_lot::{Mutex, Condvar}
//! INVARIANTS:
//!   - A signal raised before `wait` is not lost (level-triggered until `unsignal`)
//!   - An interrupt is consumed by exactly one `wait`
//!   - Deadlines only ever move later (slack is additive)

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Absolute point in time bounding a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Never expires.
    pub const INFINITE: Self = Self(None);

    /// Expires at `instant`.
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// The expiry instant, if any.
    pub const fn instant(self) -> Option<Instant> {
        self.0
    }

    /// Delays the deadline by `slack`; never moves it earlier.
    pub fn with_slack(self, slack: Duration) -> Self {
        match self.0 {
            Some(when) => Self(when.checked_add(slack).or(Some(when))),
            None => self,
        }
    }

    /// Returns `true` once the deadline has passed.
    pub fn has_expired(self) -> bool {
        self.0.is_some_and(|when| Instant::now() >= when)
    }
}

/// How a wait on an [`Event`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The event was signaled.
    Signaled,
    /// The deadline passed first.
    TimedOut,
    /// The waiting thread was interrupted by an orthogonal request.
    Interrupted,
}

#[derive(Default)]
struct EventState {
    signaled: bool,
    interrupt_pending: bool,
}

/// Level-triggered event with deadline waits and interruption.
#[derive(Default)]
pub struct Event {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    /// Creates an unsignaled event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event and wakes all waiters.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.signaled = true;
        self.cond.notify_all();
    }

    /// Clears the signal and any pending interrupt.
    pub fn unsignal(&self) {
        let mut state = self.state.lock();
        state.signaled = false;
        state.interrupt_pending = false;
    }

    /// Returns `true` while the event is signaled.
    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Requests that the current (or next) wait return [`WaitResult::Interrupted`].
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupt_pending = true;
        self.cond.notify_all();
    }

    /// Blocks until signaled, interrupted, or `deadline` passes.
    ///
    /// A signal takes precedence over a pending interrupt and over an expired deadline.
    pub fn wait(&self, deadline: Deadline) -> WaitResult {
        let mut state = self.state.lock();
        loop {
            if state.signaled {
                return WaitResult::Signaled;
            }
            if state.interrupt_pending {
                state.interrupt_pending = false;
                return WaitResult::Interrupted;
            }
            match deadline.instant() {
                None => self.cond.wait(&mut state),
                Some(when) => {
                    if Instant::now() >= when {
                        return WaitResult::TimedOut;
                    }
                    // Spurious and timed-out wakeups both re-check state above.
                    let _ = self.cond.wait_until(&mut state, when);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_observed() {
        let event = Event::new();
        event.signal();
        assert_eq!(event.wait(Deadline::after(Duration::from_millis(1))), WaitResult::Signaled);
        assert!(event.is_signaled());
        event.unsignal();
        assert!(!event.is_signaled());
    }

    #[test]
    fn wait_times_out() {
        let event = Event::new();
        let start = Instant::now();
        assert_eq!(event.wait(Deadline::after(Duration::from_millis(20))), WaitResult::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn interrupt_wakes_blocked_thread_once() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(Deadline::INFINITE))
        };
        thread::sleep(Duration::from_millis(10));
        event.interrupt();
        assert_eq!(waiter.join().unwrap(), WaitResult::Interrupted);
        assert_eq!(event.wait(Deadline::after(Duration::from_millis(1))), WaitResult::TimedOut);
    }

    #[test]
    fn slack_never_advances_deadline() {
        let base = Instant::now() + Duration::from_millis(50);
        let deadline = Deadline::at(base).with_slack(Duration::from_millis(5));
        assert!(deadline.instant().unwrap() >= base);
        assert_eq!(Deadline::INFINITE.with_slack(Duration::from_secs(1)), Deadline::INFINITE);
    }
}
