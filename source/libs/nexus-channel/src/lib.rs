// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel channel object: bidirectional message pipes with call correlation
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional (hosted)
//! API_STABILITY: Unstable
//!
//! PUBLIC API:
//!   - ChannelRuntime: creates channel pairs under arena and policy limits
//!   - ChannelDispatcher: one endpoint (write / read / call / resume_call / set_owner)
//!   - Handle, Rights: capabilities to kernel objects
//!   - Message, TxId: unit of transfer and its call correlation id
//!   - MessageWaiter: per-thread call waiter (interruptible)
//!   - SignalObserver, SignalWaiter: READABLE / WRITABLE / PEER_CLOSED notification
//!   - ResourcePolicy: creation, timer slack and backpressure hooks
//!   - syscall: rights-checked entry points
//!   - Status: error taxonomy
//!
//! DEPENDENCIES:
//!   - parking_lot: queue, relationship and waiter locks; blocking primitive
//!   - bitflags: rights and signals
//!   - thiserror: error enums
//!   - log: lifecycle, delivery and backpressure diagnostics
//!   - serde + toml: channel limits configuration
//!
//! INVARIANTS:
//!   - Lock order: relationship lock -> queue lock -> waiter slot -> event
//!   - A thread has at most one call in flight

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod channel;
pub mod config;
pub mod event;
pub mod handle;
pub mod koid;
pub mod message;
pub mod policy;
pub mod rights;
pub mod runtime;
pub mod signals;
pub mod status;
pub mod syscall;
pub mod waiter;

pub use channel::{ChannelDispatcher, ChannelInfo, EndpointState};
pub use config::{ChannelConfig, ConfigError, FullAction};
pub use event::{Deadline, Event, WaitResult};
pub use handle::{Dispatcher, Handle, HandleCount};
pub use koid::{Koid, ProcessId};
pub use message::{Message, TxId, MAX_MSG_BYTES, MAX_MSG_HANDLES};
pub use policy::{LoggingPolicy, ResourcePolicy};
pub use rights::{Rights, Signals, DEFAULT_CHANNEL_RIGHTS};
pub use runtime::ChannelRuntime;
pub use signals::{SignalObserver, SignalWaiter};
pub use status::{Result, Status};
pub use waiter::MessageWaiter;
