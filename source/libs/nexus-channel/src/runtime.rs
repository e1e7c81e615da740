// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Channel runtime: limits, resource policy, endpoint arena
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: ChannelRuntime::{new, create_channel, config, live_endpoints}
//! DEPENDS_ON: config::ChannelConfig, policy::ResourcePolicy, channel::ChannelDispatcher
//! INVARIANTS:
//!   - live endpoints never exceed `max_endpoints`
//!   - A pair reserves both arena slots at once or none

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::channel::ChannelDispatcher;
use crate::config::{ChannelConfig, ConfigError};
use crate::handle::Handle;
use crate::koid::ProcessId;
use crate::policy::{LoggingPolicy, ResourcePolicy};
use crate::status::{Result, Status};

pub(crate) struct RuntimeShared {
    pub(crate) config: ChannelConfig,
    pub(crate) policy: Arc<dyn ResourcePolicy>,
    live_endpoints: AtomicUsize,
}

impl RuntimeShared {
    /// Reserves two endpoint slots or fails with `NoMemory` without reserving any.
    pub(crate) fn reserve_pair(self: &Arc<Self>) -> Result<(ArenaSlot, ArenaSlot)> {
        let max = self.config.max_endpoints;
        self.live_endpoints
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_add(2).filter(|next| *next <= max)
            })
            .map_err(|_| Status::NoMemory)?;
        Ok((ArenaSlot { runtime: Arc::clone(self) }, ArenaSlot { runtime: Arc::clone(self) }))
    }
}

/// One reserved endpoint slot; returned to the arena on drop.
pub(crate) struct ArenaSlot {
    runtime: Arc<RuntimeShared>,
}

impl Drop for ArenaSlot {
    fn drop(&mut self) {
        self.runtime.live_endpoints.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Factory and shared limits for channel pairs.
pub struct ChannelRuntime {
    shared: Arc<RuntimeShared>,
}

impl ChannelRuntime {
    /// Creates a runtime after validating `config`.
    pub fn new(config: ChannelConfig, policy: Arc<dyn ResourcePolicy>) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(RuntimeShared { config, policy, live_endpoints: AtomicUsize::new(0) }),
        })
    }

    /// Active limits.
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Number of endpoint objects currently allocated.
    pub fn live_endpoints(&self) -> usize {
        self.shared.live_endpoints.load(Ordering::Acquire)
    }

    /// Creates a channel pair owned by `owner`, returning one handle per endpoint.
    pub fn create_channel(&self, owner: ProcessId) -> Result<(Handle, Handle)> {
        ChannelDispatcher::create(&self.shared, owner)
    }
}

impl Default for ChannelRuntime {
    fn default() -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                config: ChannelConfig::default(),
                policy: Arc::new(LoggingPolicy),
                live_endpoints: AtomicUsize::new(0),
            }),
        }
    }
}
