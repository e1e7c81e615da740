// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Rights-checked channel syscall surface
//! OWNERS: @kernel-team
//! PUBLIC API: channel_create, channel_write, channel_read, channel_call
//! DEPENDS_ON: channel::ChannelDispatcher, handle::Handle, runtime::ChannelRuntime
//! INVARIANTS:
//!   - Decode→Check→Execute: nothing reaches the channel core before every check passed
//!   - Handles passed to write/call are consumed whatever the outcome
//!   - Transferred endpoints are owned by the kernel in transit and by the reader after

use std::sync::Arc;

use log::trace;

use crate::channel::ChannelDispatcher;
use crate::event::Deadline;
use crate::handle::Handle;
use crate::koid::{Koid, ProcessId};
use crate::message::{Message, MAX_MSG_BYTES, MAX_MSG_HANDLES};
use crate::rights::Rights;
use crate::runtime::ChannelRuntime;
use crate::status::{Result, Status};

// Typed decoders for Decode→Check→Execute

struct WriteArgsTyped {
    payload: Vec<u8>,
    handles: Vec<Handle>,
}

impl WriteArgsTyped {
    #[inline]
    fn decode(bytes: &[u8], handles: Vec<Handle>) -> Self {
        Self { payload: bytes.to_vec(), handles }
    }

    #[inline]
    fn check(&self, channel: Koid) -> Result<()> {
        if self.payload.len() > MAX_MSG_BYTES || self.handles.len() > MAX_MSG_HANDLES {
            return Err(Status::OutOfRange);
        }
        for handle in &self.handles {
            if handle.koid() == channel {
                return Err(Status::NotSupported);
            }
            if !handle.has_rights(Rights::TRANSFER) {
                return Err(Status::AccessDenied);
            }
        }
        Ok(())
    }

    /// Moves the handles into kernel custody and builds the message.
    fn into_message(self) -> Result<Message> {
        for handle in &self.handles {
            handle.dispatcher().set_owner(ProcessId::KERNEL);
        }
        Message::new(self.payload, self.handles)
    }
}

#[derive(Copy, Clone)]
struct ReadArgsTyped {
    max_bytes: usize,
    max_handles: usize,
    may_discard: bool,
}

impl ReadArgsTyped {
    #[inline]
    fn decode(max_bytes: usize, max_handles: usize, may_discard: bool) -> Self {
        Self { max_bytes: max_bytes.min(MAX_MSG_BYTES), max_handles: max_handles.min(MAX_MSG_HANDLES), may_discard }
    }
}

fn channel_of(handle: &Handle, required: Rights) -> Result<Arc<ChannelDispatcher>> {
    let channel = handle.downcast::<ChannelDispatcher>().ok_or(Status::WrongType)?;
    if !handle.has_rights(required) {
        return Err(Status::AccessDenied);
    }
    Ok(channel)
}

fn adopt_handles(msg: &Message, owner: ProcessId) {
    for handle in msg.handles() {
        handle.dispatcher().set_owner(owner);
    }
}

/// Creates a channel pair owned by `owner`.
pub fn channel_create(runtime: &ChannelRuntime, owner: ProcessId) -> Result<(Handle, Handle)> {
    runtime.create_channel(owner)
}

/// Writes `bytes` and `handles` to the peer of `handle`. Requires [`Rights::WRITE`].
pub fn channel_write(handle: &Handle, owner: ProcessId, bytes: &[u8], handles: Vec<Handle>) -> Result<()> {
    let args = WriteArgsTyped::decode(bytes, handles);
    let channel = channel_of(handle, Rights::WRITE)?;
    args.check(channel.koid())?;
    channel.write(owner, args.into_message()?)
}

/// Reads the next message queued on `handle`. Requires [`Rights::READ`].
///
/// Channel endpoints carried by the message become owned by `owner`.
pub fn channel_read(
    handle: &Handle,
    owner: ProcessId,
    max_bytes: usize,
    max_handles: usize,
    may_discard: bool,
) -> Result<Message> {
    let args = ReadArgsTyped::decode(max_bytes, max_handles, may_discard);
    let channel = channel_of(handle, Rights::READ)?;
    let msg = channel.read(owner, args.max_bytes, args.max_handles, args.may_discard)?;
    adopt_handles(&msg, owner);
    Ok(msg)
}

/// Sends a request on `handle` and blocks for the reply. Requires [`Rights::READ`] and
/// [`Rights::WRITE`].
///
/// Interrupted waits are re-entered until the call reaches a terminal status.
pub fn channel_call(
    handle: &Handle,
    owner: ProcessId,
    bytes: &[u8],
    handles: Vec<Handle>,
    deadline: Deadline,
) -> Result<Message> {
    let args = WriteArgsTyped::decode(bytes, handles);
    let channel = channel_of(handle, Rights::READ | Rights::WRITE)?;
    args.check(channel.koid())?;
    let mut result = channel.call(owner, args.into_message()?, deadline);
    while let Err(Status::InternalRetry) = result {
        trace!("channel {}: resuming interrupted call", channel.koid());
        result = channel.resume_call(deadline);
    }
    let reply = result?;
    adopt_handles(&reply, owner);
    Ok(reply)
}
