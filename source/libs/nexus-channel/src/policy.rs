// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process resource-policy hook consulted by the channel core
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: ResourcePolicy, LoggingPolicy
//! INVARIANTS: Hooks are invoked with no channel lock held

use std::time::Duration;

use crate::koid::{Koid, ProcessId};

/// Enforcement point for per-process resource policy.
pub trait ResourcePolicy: Send + Sync {
    /// Whether `owner` may create a new channel pair.
    fn allow_new_channel(&self, _owner: ProcessId) -> bool {
        true
    }

    /// Amount by which `owner`'s blocking deadlines may be delayed.
    fn timer_slack(&self, _owner: ProcessId) -> Duration {
        Duration::ZERO
    }

    /// `writer` brought channel `channel`'s backlog up to the warning depth.
    ///
    /// Fires once per crossing, when the depth equals the threshold exactly.
    fn on_channel_backlog(&self, _writer: ProcessId, _channel: Koid, _depth: usize) {}

    /// `offender` pushed channel `channel` beyond its hard backlog limit.
    ///
    /// The enforcement point is expected to terminate the offending process.
    fn on_channel_full(&self, offender: ProcessId, channel: Koid, depth: usize);
}

/// Default policy: permits everything and logs hard backlog violations.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPolicy;

impl ResourcePolicy for LoggingPolicy {
    fn on_channel_full(&self, offender: ProcessId, channel: Koid, depth: usize) {
        log::error!("channel {channel}: {depth} pending messages; terminating {offender}");
    }
}
