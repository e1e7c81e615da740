// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-thread call waiter: correlation record for one in-flight call
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: MessageWaiter, current()
//! DEPENDS_ON: event::Event, channel::ChannelDispatcher
//! INVARIANTS:
//!   - One waiter per thread, re-armed per call; arming an armed waiter is BadState
//!   - Delivery and cancellation happen under the owning channel's queue lock and are
//!     mutually exclusive with removal on timeout
//!   - Lock order: channel queue lock -> waiter slot -> event

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::ChannelDispatcher;
use crate::event::{Deadline, Event, WaitResult};
use crate::koid::Koid;
use crate::message::{Message, TxId};
use crate::status::{Result, Status};

thread_local! {
    static CURRENT_WAITER: Arc<MessageWaiter> = Arc::new(MessageWaiter::new());
}

/// Returns the calling thread's waiter.
pub fn current() -> Arc<MessageWaiter> {
    CURRENT_WAITER.with(Arc::clone)
}

struct WaiterSlot {
    channel: Option<Arc<ChannelDispatcher>>,
    txid: TxId,
    status: Result<()>,
    reply: Option<Message>,
}

/// Blocking state for a thread's outstanding channel call.
pub struct MessageWaiter {
    event: Event,
    slot: Mutex<WaiterSlot>,
}

impl MessageWaiter {
    fn new() -> Self {
        Self {
            event: Event::new(),
            slot: Mutex::new(WaiterSlot {
                channel: None,
                txid: TxId::NONE,
                status: Err(Status::TimedOut),
                reply: None,
            }),
        }
    }

    /// Returns `true` while a call is outstanding on this waiter.
    pub fn is_armed(&self) -> bool {
        self.slot.lock().channel.is_some()
    }

    /// Koid of the channel endpoint the waiter is armed on.
    pub fn channel_koid(&self) -> Option<Koid> {
        self.slot.lock().channel.as_ref().map(|channel| channel.koid())
    }

    /// Transaction id of the outstanding call, or [`TxId::NONE`].
    pub fn txid(&self) -> TxId {
        self.slot.lock().txid
    }

    /// Interrupts the owning thread's wait; the call returns [`Status::InternalRetry`].
    pub fn interrupt(&self) {
        self.event.interrupt();
    }

    pub(crate) fn begin_wait(&self, channel: Arc<ChannelDispatcher>) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.channel.is_some() {
            return Err(Status::BadState);
        }
        slot.channel = Some(channel);
        slot.txid = TxId::NONE;
        slot.status = Err(Status::TimedOut);
        slot.reply = None;
        self.event.unsignal();
        Ok(())
    }

    pub(crate) fn set_txid(&self, txid: TxId) {
        self.slot.lock().txid = txid;
    }

    pub(crate) fn is_armed_on(&self, koid: Koid) -> bool {
        self.channel_koid() == Some(koid)
    }

    /// Hands `reply` to the waiting thread. Caller holds the channel queue lock.
    pub(crate) fn deliver(&self, reply: Message) {
        let mut slot = self.slot.lock();
        slot.reply = Some(reply);
        slot.status = Ok(());
        self.event.signal();
    }

    /// Aborts the wait with `status`. Caller holds the channel queue lock.
    pub(crate) fn cancel(&self, status: Status) {
        let mut slot = self.slot.lock();
        slot.status = Err(status);
        self.event.signal();
    }

    pub(crate) fn wait(&self, deadline: Deadline) -> Result<WaitResult> {
        if !self.is_armed() {
            return Err(Status::BadState);
        }
        Ok(self.event.wait(deadline))
    }

    /// Disarms the waiter and yields the call outcome.
    pub(crate) fn end_wait(&self) -> Result<Message> {
        let mut slot = self.slot.lock();
        if slot.channel.take().is_none() {
            return Err(Status::BadState);
        }
        slot.txid = TxId::NONE;
        let reply = slot.reply.take();
        match core::mem::replace(&mut slot.status, Err(Status::TimedOut)) {
            Ok(()) => reply.ok_or(Status::BadState),
            Err(status) => Err(status),
        }
    }
}
