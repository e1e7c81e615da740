// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Relationship state shared by the two endpoints of one channel.
//!
//! The holder's lock is the outermost lock of the channel: it guards the peer links,
//! the pair's call-id counter and (together with the queue lock) endpoint ownership.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use super::ChannelDispatcher;
use crate::message::TxId;

/// Which end of the pair an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    const fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    const fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

pub(crate) struct PeerLinks {
    endpoints: [Weak<ChannelDispatcher>; 2],
    txid_counter: u32,
}

impl PeerLinks {
    /// Live peer of `side`, or `None` once either end has been destroyed.
    pub(crate) fn peer_of(&self, side: Side) -> Option<Arc<ChannelDispatcher>> {
        self.endpoints[side.opposite().index()].upgrade()
    }

    /// Severs both links and returns the peer of `side` if it is still alive.
    pub(crate) fn detach(&mut self, side: Side) -> Option<Arc<ChannelDispatcher>> {
        self.endpoints[side.index()] = Weak::new();
        core::mem::take(&mut self.endpoints[side.opposite().index()]).upgrade()
    }

    /// Next candidate call id for either end of the pair.
    pub(crate) fn next_txid(&mut self) -> TxId {
        self.txid_counter = self.txid_counter.wrapping_add(1) & !TxId::KERNEL_BIT;
        TxId::kernel(self.txid_counter)
    }
}

pub(crate) struct PeerHolder {
    links: Mutex<PeerLinks>,
}

impl PeerHolder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(PeerLinks { endpoints: [Weak::new(), Weak::new()], txid_counter: 0 }),
        })
    }

    pub(crate) fn link(&self, left: &Arc<ChannelDispatcher>, right: &Arc<ChannelDispatcher>) {
        let mut links = self.links.lock();
        links.endpoints = [Arc::downgrade(left), Arc::downgrade(right)];
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PeerLinks> {
        self.links.lock()
    }
}
