// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Handle rights and object signals
//! OWNERS: @kernel-cap-team
//! PUBLIC API: Rights, Signals, DEFAULT_CHANNEL_RIGHTS
//! INVARIANTS: Rights only shrink on duplication; signals reflect queue and peer state

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
    /// Rights associated with a capability handle.
    pub struct Rights: u32 {
        /// May be moved to another process inside a message.
        const TRANSFER = 1 << 0;
        /// May be duplicated.
        const DUPLICATE = 1 << 1;
        /// May read messages.
        const READ = 1 << 2;
        /// May write messages.
        const WRITE = 1 << 3;
        /// May wait on signals.
        const WAIT = 1 << 4;
        /// May query object information.
        const INSPECT = 1 << 5;
        /// May assert user signals on the object.
        const SIGNAL = 1 << 6;
        /// May assert user signals on the peer.
        const SIGNAL_PEER = 1 << 7;
    }
}

/// Rights granted to both handles returned by channel creation.
pub const DEFAULT_CHANNEL_RIGHTS: Rights = Rights::TRANSFER
    .union(Rights::DUPLICATE)
    .union(Rights::READ)
    .union(Rights::WRITE)
    .union(Rights::WAIT)
    .union(Rights::INSPECT)
    .union(Rights::SIGNAL)
    .union(Rights::SIGNAL_PEER);

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default)]
    /// Observable state bits of a channel endpoint.
    pub struct Signals: u32 {
        /// At least one message is queued.
        const READABLE = 1 << 0;
        /// The peer can still accept messages.
        const WRITABLE = 1 << 1;
        /// The peer endpoint has no open handles left.
        const PEER_CLOSED = 1 << 2;
    }
}
