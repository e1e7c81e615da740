// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Channel message: byte payload, transferred handles, transaction id
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Message, TxId, MAX_MSG_BYTES, MAX_MSG_HANDLES
//! INVARIANTS:
//!   - Payload and handle count never exceed the wire limits
//!   - A message is immutable once built; ownership moves from writer to reader
//!   - The kernel bit of a txid is only set by call-id generation or by a reply echoing it

use core::fmt;

use crate::handle::Handle;
use crate::status::{Result, Status};

/// Largest payload a single message may carry.
pub const MAX_MSG_BYTES: usize = 65_536;

/// Largest number of handles a single message may carry.
pub const MAX_MSG_HANDLES: usize = 64;

/// Transaction id correlating a call request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId(u32);

impl TxId {
    /// No transaction id; never matches a waiting call.
    pub const NONE: Self = Self(0);

    /// Bit reserved for kernel-generated call ids.
    pub const KERNEL_BIT: u32 = 0x8000_0000;

    /// Wraps a raw txid.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds a kernel-range txid from a counter value.
    pub(crate) const fn kernel(counter: u32) -> Self {
        Self(counter | Self::KERNEL_BIT)
    }

    /// Raw value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for ids minted by call-id generation.
    pub const fn is_kernel_generated(self) -> bool {
        self.0 & Self::KERNEL_BIT != 0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Unit of transfer between the two endpoints of a channel.
#[derive(Debug)]
pub struct Message {
    payload: Vec<u8>,
    handles: Vec<Handle>,
    txid: TxId,
}

impl Message {
    /// Builds a message, rejecting payloads or handle lists beyond the wire limits.
    pub fn new(payload: Vec<u8>, handles: Vec<Handle>) -> Result<Self> {
        if payload.len() > MAX_MSG_BYTES || handles.len() > MAX_MSG_HANDLES {
            return Err(Status::OutOfRange);
        }
        Ok(Self { payload, handles, txid: TxId::NONE })
    }

    /// Builds a handle-free message from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.to_vec(), Vec::new())
    }

    /// Returns the message with `txid` set.
    pub fn with_txid(mut self, txid: TxId) -> Self {
        self.txid = txid;
        self
    }

    pub(crate) fn stamp(&mut self, txid: TxId) {
        self.txid = txid;
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Transferred handles, in the order they were written.
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Transaction id.
    pub fn txid(&self) -> TxId {
        self.txid
    }

    /// Payload length in bytes.
    pub fn data_size(&self) -> usize {
        self.payload.len()
    }

    /// Number of handles carried.
    pub fn num_handles(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if the message fits within the given capacity.
    pub(crate) fn fits(&self, max_bytes: usize, max_handles: usize) -> bool {
        self.payload.len() <= max_bytes && self.handles.len() <= max_handles
    }

    /// Splits the message into payload and handles.
    pub fn into_parts(self) -> (Vec<u8>, Vec<Handle>) {
        (self.payload, self.handles)
    }
}
