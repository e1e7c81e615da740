// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel object and process identifiers.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// First koid handed out; lower values are reserved for well-known objects.
const FIRST_KOID: u64 = 1024;

static NEXT_KOID: AtomicU64 = AtomicU64::new(FIRST_KOID);

/// Kernel object identifier, unique for the lifetime of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Koid(u64);

impl Koid {
    /// Identifier that never names a live object.
    pub const INVALID: Self = Self(0);

    /// Allocates a fresh identifier.
    pub(crate) fn generate() -> Self {
        Self(NEXT_KOID.fetch_add(1, Ordering::Relaxed))
    }

    /// Exposes the raw numeric value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Koid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the process owning an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// The kernel itself.
    pub const KERNEL: Self = Self(0);

    /// Wraps a raw process identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Exposes the raw numeric value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}
