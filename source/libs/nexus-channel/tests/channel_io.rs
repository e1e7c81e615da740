// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for non-blocking channel write/read
//! OWNERS: @kernel-ipc-team
//!
//! TEST_SCOPE:
//!   - FIFO delivery and READABLE signalling
//!   - Peer closure, oversized reads, ownership checks
//!   - Soft/hard backpressure in both full actions
//!
//! TEST_SCENARIOS:
//!   - ping_is_read_back(): A writes "ping", B reads it, READABLE clears
//!   - fifo_is_lossless(): proptest over arbitrary payload sequences
//!   - write_to_closed_peer_fails(): no enqueue after the peer lost its handles
//!   - undersized_read_keeps_message() / discard_drops_message()
//!   - terminate_reports_writer() / reject_refuses_write()
//!   - backlog_warning_fires_at_threshold_crossing()
//!   - set_owner_revokes_old_owner() / set_owner_is_atomic_with_concurrent_writes()
//!   - signal_waiter_wakes_on_write()

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nexus_channel::{
    ChannelConfig, ChannelDispatcher, ChannelRuntime, Deadline, FullAction, Handle, Koid, Message,
    ProcessId, ResourcePolicy, SignalObserver, SignalWaiter, Signals, Status,
};
use parking_lot::Mutex;
use proptest::prelude::*;

const PID: ProcessId = ProcessId::new(10);

fn pair(runtime: &ChannelRuntime) -> (Handle, Handle, Arc<ChannelDispatcher>, Arc<ChannelDispatcher>) {
    let (a, b) = runtime.create_channel(PID).unwrap();
    let ca = a.downcast::<ChannelDispatcher>().unwrap();
    let cb = b.downcast::<ChannelDispatcher>().unwrap();
    (a, b, ca, cb)
}

fn msg(bytes: &[u8]) -> Message {
    Message::from_bytes(bytes).unwrap()
}

#[derive(Default)]
struct RecordingPolicy {
    backlog: Mutex<Vec<(ProcessId, Koid, usize)>>,
    full: Mutex<Vec<(ProcessId, Koid, usize)>>,
}

impl ResourcePolicy for RecordingPolicy {
    fn on_channel_backlog(&self, writer: ProcessId, channel: Koid, depth: usize) {
        self.backlog.lock().push((writer, channel, depth));
    }

    fn on_channel_full(&self, offender: ProcessId, channel: Koid, depth: usize) {
        self.full.lock().push((offender, channel, depth));
    }
}

fn limited(action: FullAction, policy: Arc<RecordingPolicy>) -> ChannelRuntime {
    let config = ChannelConfig { warn_pending: 2, max_pending: 4, full_action: action, ..ChannelConfig::default() };
    ChannelRuntime::new(config, policy).unwrap()
}

#[test]
fn ping_is_read_back() {
    let runtime = ChannelRuntime::default();
    let (_a, _b, ca, cb) = pair(&runtime);
    ca.write(PID, msg(b"ping")).unwrap();
    assert!(cb.signals().contains(Signals::READABLE));
    assert!(!ca.signals().contains(Signals::READABLE));

    let got = cb.read(PID, 64, 0, false).unwrap();
    assert_eq!(got.payload(), b"ping");
    assert_eq!(got.num_handles(), 0);
    assert!(!cb.signals().contains(Signals::READABLE));
    assert_eq!(cb.read(PID, 64, 0, false).unwrap_err(), Status::ShouldWait);
}

proptest! {
    #[test]
    fn fifo_is_lossless(payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..48)) {
        let runtime = ChannelRuntime::default();
        let (_a, _b, ca, cb) = pair(&runtime);
        for payload in &payloads {
            ca.write(PID, Message::new(payload.clone(), Vec::new()).unwrap()).unwrap();
        }
        prop_assert_eq!(cb.info().queued, payloads.len());
        prop_assert_eq!(cb.info().max_ever_queued, payloads.len());
        for payload in &payloads {
            let got = cb.read(PID, 64, 0, false).unwrap();
            prop_assert_eq!(got.payload(), payload.as_slice());
        }
        prop_assert_eq!(cb.read(PID, 64, 0, false).unwrap_err(), Status::ShouldWait);
    }
}

#[test]
fn write_to_closed_peer_fails() {
    let runtime = ChannelRuntime::default();
    let (_a, b, ca, cb) = pair(&runtime);
    drop(b);
    assert_eq!(ca.write(PID, msg(b"lost")).unwrap_err(), Status::PeerClosed);
    assert_eq!(cb.info().queued, 0);
    assert!(ca.signals().contains(Signals::PEER_CLOSED));
    assert!(!ca.signals().contains(Signals::WRITABLE));
    assert_eq!(ca.read(PID, 64, 0, false).unwrap_err(), Status::PeerClosed);
}

#[test]
fn undersized_read_keeps_message() {
    let runtime = ChannelRuntime::default();
    let (_a, _b, ca, cb) = pair(&runtime);
    ca.write(PID, msg(b"0123456789")).unwrap();
    assert_eq!(
        cb.read(PID, 4, 0, false).unwrap_err(),
        Status::BufferTooSmall { bytes: 10, handles: 0 }
    );
    assert_eq!(cb.info().queued, 1);
    assert_eq!(cb.read(PID, 16, 0, false).unwrap().payload(), b"0123456789");
}

#[test]
fn discard_drops_message() {
    let runtime = ChannelRuntime::default();
    let (_a, _b, ca, cb) = pair(&runtime);
    ca.write(PID, msg(b"0123456789")).unwrap();
    ca.write(PID, msg(b"ok")).unwrap();
    assert_eq!(
        cb.read(PID, 4, 0, true).unwrap_err(),
        Status::BufferTooSmall { bytes: 10, handles: 0 }
    );
    assert_eq!(cb.read(PID, 4, 0, true).unwrap().payload(), b"ok");
    assert!(!cb.signals().contains(Signals::READABLE));
}

#[test]
fn discarded_message_releases_its_handles() {
    let runtime = ChannelRuntime::default();
    let (_a, _b, ca, cb) = pair(&runtime);
    let (c, d) = runtime.create_channel(PID).unwrap();
    let cd = d.downcast::<ChannelDispatcher>().unwrap();
    ca.write(PID, Message::new(b"carrier".to_vec(), vec![c]).unwrap()).unwrap();
    assert_eq!(
        cb.read(PID, 64, 0, true).unwrap_err(),
        Status::BufferTooSmall { bytes: 7, handles: 1 }
    );
    assert!(cd.signals().contains(Signals::PEER_CLOSED));
}

#[test]
fn terminate_reports_writer() {
    let policy = Arc::new(RecordingPolicy::default());
    let runtime = limited(FullAction::Terminate, Arc::clone(&policy));
    let (_a, _b, ca, cb) = pair(&runtime);
    for i in 0..4u8 {
        ca.write(PID, msg(&[i])).unwrap();
    }
    assert!(policy.full.lock().is_empty());
    ca.write(PID, msg(b"5")).unwrap();
    ca.write(PID, msg(b"6")).unwrap();
    assert_eq!(*policy.full.lock(), vec![(PID, cb.koid(), 5), (PID, cb.koid(), 6)]);
    assert_eq!(*policy.backlog.lock(), vec![(PID, cb.koid(), 2)]);
    assert_eq!(cb.info().queued, 6);
}

#[test]
fn backlog_warning_fires_at_threshold_crossing() {
    let policy = Arc::new(RecordingPolicy::default());
    let runtime = limited(FullAction::Terminate, Arc::clone(&policy));
    let (_a, _b, ca, cb) = pair(&runtime);
    ca.write(PID, msg(b"1")).unwrap();
    assert!(policy.backlog.lock().is_empty());
    ca.write(PID, msg(b"2")).unwrap();
    ca.write(PID, msg(b"3")).unwrap();
    assert_eq!(policy.backlog.lock().len(), 1);

    // Draining below the threshold and refilling crosses it again.
    cb.read(PID, 8, 0, false).unwrap();
    cb.read(PID, 8, 0, false).unwrap();
    ca.write(PID, msg(b"4")).unwrap();
    assert_eq!(*policy.backlog.lock(), vec![(PID, cb.koid(), 2), (PID, cb.koid(), 2)]);
    assert!(policy.full.lock().is_empty());
}

#[test]
fn reject_refuses_write() {
    let policy = Arc::new(RecordingPolicy::default());
    let runtime = limited(FullAction::Reject, Arc::clone(&policy));
    let (_a, _b, ca, cb) = pair(&runtime);
    for i in 0..4u8 {
        ca.write(PID, msg(&[i])).unwrap();
    }
    assert_eq!(ca.write(PID, msg(b"overflow")).unwrap_err(), Status::ShouldWait);
    assert_eq!(cb.info().queued, 4);
    assert_eq!(cb.read(PID, 8, 0, false).unwrap().payload(), &[0]);
    ca.write(PID, msg(b"fits")).unwrap();
    assert_eq!(cb.info().max_ever_queued, 4);
    assert!(policy.full.lock().is_empty());
}

#[test]
fn set_owner_revokes_old_owner() {
    let runtime = ChannelRuntime::default();
    let (_a, _b, ca, cb) = pair(&runtime);
    let next = ProcessId::new(11);
    ca.set_owner(next);
    assert_eq!(ca.info().owner, next);
    assert_eq!(ca.write(PID, msg(b"stale")).unwrap_err(), Status::BadHandle);
    assert_eq!(ca.read(PID, 8, 0, false).unwrap_err(), Status::BadHandle);
    assert_eq!(
        ca.call(PID, msg(b"stale"), Deadline::after(Duration::from_secs(1))).unwrap_err(),
        Status::BadHandle
    );
    assert!(!nexus_channel::waiter::current().is_armed());
    assert_eq!(ca.info().outstanding_calls, 0);

    ca.write(next, msg(b"fresh")).unwrap();
    assert_eq!(cb.read(PID, 8, 0, false).unwrap().payload(), b"fresh");
}

#[test]
fn set_owner_is_atomic_with_concurrent_writes() {
    const AFTER_SWITCH: usize = 50;
    let runtime = ChannelRuntime::default();
    let (_a, _b, ca, cb) = pair(&runtime);
    let next = ProcessId::new(12);

    let writer = {
        let ca = Arc::clone(&ca);
        thread::spawn(move || {
            let (mut old_ok, mut new_ok) = (0usize, 0usize);
            let mut switched = false;
            while new_ok < AFTER_SWITCH {
                let (who, tag) = if switched { (next, b"new") } else { (PID, b"old") };
                match ca.write(who, msg(tag)) {
                    Ok(()) if switched => new_ok += 1,
                    Ok(()) => old_ok += 1,
                    Err(Status::BadHandle) => {
                        assert!(!switched, "new owner rejected");
                        switched = true;
                    }
                    Err(other) => panic!("unexpected write failure: {other}"),
                }
                thread::yield_now();
            }
            (old_ok, new_ok)
        })
    };

    let start = std::time::Instant::now();
    while cb.info().queued < 20 {
        assert!(start.elapsed() < Duration::from_secs(10), "writer made no progress");
        thread::yield_now();
    }
    ca.set_owner(next);
    let (old_ok, new_ok) = writer.join().unwrap();

    // Every write accepted under the old owner precedes every write under the new one.
    let mut tags = Vec::new();
    while let Ok(got) = cb.read(PID, 8, 0, false) {
        tags.push(got.payload().to_vec());
    }
    assert_eq!(tags.len(), old_ok + new_ok);
    let first_new = tags.iter().position(|tag| tag == b"new").unwrap();
    assert_eq!(first_new, old_ok);
    assert!(tags[first_new..].iter().all(|tag| tag == b"new"));
}

#[test]
fn signal_waiter_wakes_on_write() {
    let runtime = ChannelRuntime::default();
    let (_a, b, ca, cb) = pair(&runtime);
    let waiter = SignalWaiter::new();
    let observer: Arc<dyn SignalObserver> = waiter.clone();
    cb.add_observer(Arc::clone(&observer));
    assert_eq!(waiter.signals(), Signals::WRITABLE);

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        ca.write(PID, msg(b"wake")).unwrap();
        ca
    });
    let seen = waiter.wait_for(Signals::READABLE, Deadline::after(Duration::from_secs(5))).unwrap();
    assert!(seen.contains(Signals::READABLE));
    let ca = writer.join().unwrap();

    assert!(cb.remove_observer(&observer));
    let peer_watch = SignalWaiter::new();
    ca.add_observer(peer_watch.clone());
    drop(b);
    assert_eq!(
        peer_watch.wait_for(Signals::PEER_CLOSED, Deadline::after(Duration::from_secs(1))),
        Ok(Signals::PEER_CLOSED)
    );
}
