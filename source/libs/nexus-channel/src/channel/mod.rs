// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Channel endpoint object: message queue, peer lifecycle, call correlation
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: ChannelDispatcher::{write, read, call, resume_call, set_owner, info,
//!   add_observer, remove_observer}, ChannelInfo, EndpointState
//! DEPENDS_ON: channel::peer (relationship lock), waiter::MessageWaiter, policy::ResourcePolicy
//! INVARIANTS:
//!   - Messages are delivered FIFO and never lost while both endpoints are open
//!   - A reply reaches at most one waiter, and only the one registered under its txid
//!   - Lock order: relationship lock -> queue lock (own or peer's) -> waiter slot -> event
//!   - Owner is written with both locks held; read under either
//!   - Messages and handles are dropped only after every channel lock is released
//!   - Policy hooks run with no channel lock held
//!   - Write and call registration hold the pair's relationship lock across the peer
//!     enqueue, so writes from both ends serialize on it. Waiter sets therefore only grow
//!     under that lock, which keeps the txid collision check in `register_waiter` sound
//!
//! TESTS: unit tests below; end-to-end scenarios in `tests/`

mod peer;

use core::sync::atomic::{AtomicU64, Ordering};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use self::peer::{PeerHolder, PeerLinks, Side};
use crate::config::FullAction;
use crate::event::{Deadline, WaitResult};
use crate::handle::{Dispatcher, Handle, HandleCount};
use crate::koid::{Koid, ProcessId};
use crate::message::{Message, TxId};
use crate::rights::{Signals, DEFAULT_CHANNEL_RIGHTS};
use crate::runtime::{ArenaSlot, RuntimeShared};
use crate::signals::{SignalObserver, SignalState};
use crate::status::{Result, Status};
use crate::waiter::{self, MessageWaiter};

/// Lifecycle of one endpoint. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Both endpoints have open handles.
    Open,
    /// The peer is gone; queued messages may still be read.
    PeerClosed,
    /// This endpoint's last handle closed.
    Destroyed,
}

/// Point-in-time snapshot of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// This endpoint.
    pub koid: Koid,
    /// The paired endpoint.
    pub related_koid: Koid,
    /// Process currently owning the endpoint.
    pub owner: ProcessId,
    /// Lifecycle state.
    pub state: EndpointState,
    /// Messages waiting to be read.
    pub queued: usize,
    /// Deepest the queue has ever been.
    pub max_ever_queued: usize,
    /// Calls issued from this endpoint still waiting for a reply.
    pub outstanding_calls: usize,
    /// Current signal set.
    pub signals: Signals,
}

struct QueueState {
    messages: VecDeque<Message>,
    waiters: HashMap<TxId, Arc<MessageWaiter>>,
    lifecycle: EndpointState,
    max_ever_queued: usize,
    signals: SignalState,
}

/// Result of placing a message into an endpoint's inbound side.
enum Enqueue {
    /// Handed straight to a waiting call.
    Delivered,
    /// Queued at the given backlog level.
    Queued(Backlog),
    /// Refused by the `Reject` backpressure action; returned so it drops outside locks.
    Rejected(Message),
}

/// Queue depth relative to the configured thresholds after an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backlog {
    Normal,
    /// Depth just reached `warn_pending`.
    Warn(usize),
    /// Depth exceeds `max_pending` under `FullAction::Terminate`.
    OverLimit(usize),
}

/// One endpoint of a channel pair.
pub struct ChannelDispatcher {
    koid: Koid,
    peer_koid: Koid,
    side: Side,
    handles: HandleCount,
    owner: AtomicU64,
    holder: Arc<PeerHolder>,
    state: Mutex<QueueState>,
    runtime: Arc<RuntimeShared>,
    _slot: ArenaSlot,
}

static_assertions::assert_impl_all!(ChannelDispatcher: Send, Sync);

impl ChannelDispatcher {
    pub(crate) fn create(runtime: &Arc<RuntimeShared>, owner: ProcessId) -> Result<(Handle, Handle)> {
        if !runtime.policy.allow_new_channel(owner) {
            debug!("channel create denied for {owner}");
            return Err(Status::AccessDenied);
        }
        let (left_slot, right_slot) = runtime.reserve_pair()?;
        let holder = PeerHolder::new();
        let (left_koid, right_koid) = (Koid::generate(), Koid::generate());
        let left = Arc::new(Self::new(left_koid, right_koid, Side::Left, &holder, owner, runtime, left_slot));
        let right = Arc::new(Self::new(right_koid, left_koid, Side::Right, &holder, owner, runtime, right_slot));
        holder.link(&left, &right);
        debug!("channel created: {left_koid} <-> {right_koid} owner={owner}");
        Ok((Handle::make(left, DEFAULT_CHANNEL_RIGHTS), Handle::make(right, DEFAULT_CHANNEL_RIGHTS)))
    }

    fn new(
        koid: Koid,
        peer_koid: Koid,
        side: Side,
        holder: &Arc<PeerHolder>,
        owner: ProcessId,
        runtime: &Arc<RuntimeShared>,
        slot: ArenaSlot,
    ) -> Self {
        Self {
            koid,
            peer_koid,
            side,
            handles: HandleCount::new(),
            owner: AtomicU64::new(owner.raw()),
            holder: Arc::clone(holder),
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                waiters: HashMap::new(),
                lifecycle: EndpointState::Open,
                max_ever_queued: 0,
                signals: SignalState::new(Signals::WRITABLE),
            }),
            runtime: Arc::clone(runtime),
            _slot: slot,
        }
    }

    /// Identifier of this endpoint.
    pub fn koid(&self) -> Koid {
        self.koid
    }

    /// Identifier of the paired endpoint (stable even after the peer is gone).
    pub fn peer_koid(&self) -> Koid {
        self.peer_koid
    }

    /// Process currently owning this endpoint.
    pub fn owner(&self) -> ProcessId {
        ProcessId::new(self.owner.load(Ordering::Acquire))
    }

    /// Reassigns the owning process. Operations still carrying the old owner fail with
    /// [`Status::BadHandle`].
    pub fn set_owner(&self, owner: ProcessId) {
        let _links = self.holder.lock();
        let _state = self.state.lock();
        self.owner.store(owner.raw(), Ordering::Release);
    }

    /// Current signal set.
    pub fn signals(&self) -> Signals {
        self.state.lock().signals.current()
    }

    /// Registers `observer`; it is notified immediately and on every signal change.
    pub fn add_observer(&self, observer: Arc<dyn SignalObserver>) {
        self.state.lock().signals.add(self.koid, observer);
    }

    /// Unregisters `observer`, returning whether it was registered.
    pub fn remove_observer(&self, observer: &Arc<dyn SignalObserver>) -> bool {
        self.state.lock().signals.remove(observer)
    }

    /// Snapshot for introspection and diagnostics.
    pub fn info(&self) -> ChannelInfo {
        let state = self.state.lock();
        ChannelInfo {
            koid: self.koid,
            related_koid: self.peer_koid,
            owner: self.owner(),
            state: state.lifecycle,
            queued: state.messages.len(),
            max_ever_queued: state.max_ever_queued,
            outstanding_calls: state.waiters.len(),
            signals: state.signals.current(),
        }
    }

    /// Sends `msg` to the peer without blocking.
    ///
    /// A message whose txid matches a call outstanding on the peer completes that call
    /// instead of being queued.
    pub fn write(&self, owner: ProcessId, msg: Message) -> Result<()> {
        let (outcome, peer_koid) = {
            let links = self.holder.lock();
            let peer = self.checked_peer(&links, owner)?;
            (peer.enqueue(msg, owner), peer.koid)
        };
        self.settle(outcome, owner, peer_koid)
    }

    /// Pops the oldest queued message without blocking.
    ///
    /// A front message larger than `max_bytes`/`max_handles` fails with
    /// [`Status::BufferTooSmall`]; it stays queued unless `may_discard` is set.
    pub fn read(&self, owner: ProcessId, max_bytes: usize, max_handles: usize, may_discard: bool) -> Result<Message> {
        let mut state = self.state.lock();
        if self.owner() != owner {
            return Err(Status::BadHandle);
        }
        let Some(front) = state.messages.front() else {
            return Err(match state.lifecycle {
                EndpointState::Open => Status::ShouldWait,
                EndpointState::PeerClosed | EndpointState::Destroyed => Status::PeerClosed,
            });
        };
        let fits = front.fits(max_bytes, max_handles);
        let (bytes, handles) = (front.data_size(), front.num_handles());
        if !fits && !may_discard {
            return Err(Status::BufferTooSmall { bytes, handles });
        }
        let popped = state.messages.pop_front();
        if state.messages.is_empty() {
            state.signals.update(self.koid, Signals::READABLE, Signals::empty());
        }
        drop(state);

        let msg = popped.ok_or(Status::ShouldWait)?;
        if fits {
            Ok(msg)
        } else {
            trace!("channel {}: discarded {bytes}-byte message", self.koid);
            drop(msg);
            Err(Status::BufferTooSmall { bytes, handles })
        }
    }

    /// Sends `msg` as a request and blocks until the matching reply arrives.
    ///
    /// The message is stamped with a fresh kernel txid; the peer replies by writing a
    /// message carrying the same txid. On [`Status::InternalRetry`] the request stays
    /// outstanding and [`ChannelDispatcher::resume_call`] continues the wait.
    pub fn call(self: &Arc<Self>, owner: ProcessId, mut msg: Message, deadline: Deadline) -> Result<Message> {
        let waiter = waiter::current();
        waiter.begin_wait(Arc::clone(self))?;
        let deadline = deadline.with_slack(self.runtime.policy.timer_slack(owner));

        let (outcome, peer_koid) = {
            let mut links = self.holder.lock();
            let peer = match self.checked_peer(&links, owner) {
                Ok(peer) => peer,
                Err(status) => {
                    drop(links);
                    let _ = waiter.end_wait();
                    return Err(status);
                }
            };
            let txid = self.register_waiter(&mut links, &peer, &waiter);
            msg.stamp(txid);
            trace!("channel {}: call {txid} -> {}", self.koid, peer.koid);
            (peer.enqueue(msg, owner), peer.koid)
        };
        if let Err(status) = self.settle(outcome, owner, peer_koid) {
            self.withdraw(&waiter);
            let _ = waiter.end_wait();
            return Err(status);
        }
        self.wait_for_reply(&waiter, deadline)
    }

    /// Re-enters the wait of a call interrupted with [`Status::InternalRetry`].
    ///
    /// Fails with [`Status::BadState`] if the calling thread has no call outstanding on
    /// this endpoint.
    pub fn resume_call(&self, deadline: Deadline) -> Result<Message> {
        let waiter = waiter::current();
        if !waiter.is_armed_on(self.koid) {
            return Err(Status::BadState);
        }
        let deadline = deadline.with_slack(self.runtime.policy.timer_slack(self.owner()));
        self.wait_for_reply(&waiter, deadline)
    }

    fn checked_peer(&self, links: &PeerLinks, owner: ProcessId) -> Result<Arc<ChannelDispatcher>> {
        if self.owner() != owner {
            return Err(Status::BadHandle);
        }
        links.peer_of(self.side).ok_or(Status::PeerClosed)
    }

    /// Allocates a txid unused on either end and registers `waiter` under it.
    /// Both waiter sets only grow under the relationship lock, so the check holds.
    fn register_waiter(&self, links: &mut PeerLinks, peer: &ChannelDispatcher, waiter: &Arc<MessageWaiter>) -> TxId {
        loop {
            let txid = links.next_txid();
            if peer.state.lock().waiters.contains_key(&txid) {
                continue;
            }
            let mut state = self.state.lock();
            if state.waiters.contains_key(&txid) {
                continue;
            }
            waiter.set_txid(txid);
            state.waiters.insert(txid, Arc::clone(waiter));
            return txid;
        }
    }

    /// Removes `waiter` from this endpoint's waiter set if it is still registered.
    fn withdraw(&self, waiter: &Arc<MessageWaiter>) {
        let mut state = self.state.lock();
        let txid = waiter.txid();
        if state.waiters.get(&txid).is_some_and(|registered| Arc::ptr_eq(registered, waiter)) {
            state.waiters.remove(&txid);
        }
    }

    fn wait_for_reply(&self, waiter: &Arc<MessageWaiter>, deadline: Deadline) -> Result<Message> {
        match waiter.wait(deadline)? {
            WaitResult::Interrupted => {
                trace!("channel {}: call {} interrupted", self.koid, waiter.txid());
                return Err(Status::InternalRetry);
            }
            WaitResult::Signaled | WaitResult::TimedOut => {}
        }
        // A reply or cancellation racing the deadline is resolved here: whoever removed
        // the waiter first decides the outcome recorded in its slot.
        self.withdraw(waiter);
        waiter.end_wait()
    }

    /// Inbound half of a write. Caller holds the relationship lock.
    fn enqueue(&self, msg: Message, writer: ProcessId) -> Enqueue {
        let config = &self.runtime.config;
        let mut state = self.state.lock();
        if let Some(waiter) = state.waiters.remove(&msg.txid()) {
            trace!("channel {}: reply {} delivered to waiter", self.koid, msg.txid());
            waiter.deliver(msg);
            return Enqueue::Delivered;
        }
        if config.full_action == FullAction::Reject && state.messages.len() >= config.max_pending {
            warn!("channel {}: queue full ({}), rejecting write from {writer}", self.koid, state.messages.len());
            return Enqueue::Rejected(msg);
        }
        state.messages.push_back(msg);
        let depth = state.messages.len();
        state.max_ever_queued = state.max_ever_queued.max(depth);
        state.signals.update(self.koid, Signals::empty(), Signals::READABLE);

        if config.full_action == FullAction::Terminate && depth > config.max_pending {
            return Enqueue::Queued(Backlog::OverLimit(depth));
        }
        if depth == config.warn_pending {
            return Enqueue::Queued(Backlog::Warn(depth));
        }
        Enqueue::Queued(Backlog::Normal)
    }

    /// Completes a write once all channel locks are released.
    fn settle(&self, outcome: Enqueue, writer: ProcessId, target: Koid) -> Result<()> {
        match outcome {
            Enqueue::Delivered | Enqueue::Queued(Backlog::Normal) => Ok(()),
            Enqueue::Queued(Backlog::Warn(depth)) => {
                warn!("channel {target}: {depth} pending messages (writer {writer})");
                self.runtime.policy.on_channel_backlog(writer, target, depth);
                Ok(())
            }
            Enqueue::Queued(Backlog::OverLimit(depth)) => {
                error!(
                    "channel {target}: {depth} pending messages exceeds {} (writer {writer})",
                    self.runtime.config.max_pending
                );
                self.runtime.policy.on_channel_full(writer, target, depth);
                Ok(())
            }
            Enqueue::Rejected(msg) => {
                drop(msg);
                Err(Status::ShouldWait)
            }
        }
    }

    /// Peer lost its last handle. Caller holds the relationship lock.
    fn on_peer_zero_handles(&self) {
        let mut state = self.state.lock();
        if state.lifecycle == EndpointState::Open {
            state.lifecycle = EndpointState::PeerClosed;
        }
        state.signals.update(self.koid, Signals::WRITABLE, Signals::PEER_CLOSED);
        for (_, waiter) in state.waiters.drain() {
            waiter.cancel(Status::PeerClosed);
        }
    }
}

impl Dispatcher for ChannelDispatcher {
    fn koid(&self) -> Koid {
        self.koid
    }

    fn related_koid(&self) -> Koid {
        self.peer_koid
    }

    fn handle_count(&self) -> &HandleCount {
        &self.handles
    }

    fn on_zero_handles(&self) {
        let (peer, drained) = {
            let mut links = self.holder.lock();
            let peer = links.detach(self.side);
            let drained = {
                let mut state = self.state.lock();
                state.lifecycle = EndpointState::Destroyed;
                for (_, waiter) in state.waiters.drain() {
                    waiter.cancel(Status::Canceled);
                }
                state.signals.clear_observers();
                core::mem::take(&mut state.messages)
            };
            if let Some(peer) = &peer {
                peer.on_peer_zero_handles();
            }
            (peer, drained)
        };
        debug!(
            "channel {} destroyed: {} queued messages dropped, peer {}",
            self.koid,
            drained.len(),
            if peer.is_some() { "notified" } else { "already gone" }
        );
        drop(drained);
        drop(peer);
    }

    fn set_owner(&self, owner: ProcessId) {
        ChannelDispatcher::set_owner(self, owner);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
