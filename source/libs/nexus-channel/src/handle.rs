// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Capability handles and the kernel-object dispatcher seam
//! OWNERS: @kernel-cap-team
//! PUBLIC API: Dispatcher, HandleCount, Handle
//! DEPENDS_ON: rights::Rights, koid::Koid
//! INVARIANTS:
//!   - A handle count never climbs back from zero: handles are only minted at object
//!     creation or duplicated from a live handle
//!   - `on_zero_handles` runs exactly once, on the thread dropping the last handle
//!   - Duplication never widens rights

use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::koid::{Koid, ProcessId};
use crate::rights::Rights;
use crate::status::{Result, Status};

/// Number of open handles referring to one kernel object.
#[derive(Debug, Default)]
pub struct HandleCount(AtomicU32);

impl HandleCount {
    /// Creates a counter with no handles.
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Current number of handles.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` when the last handle went away.
    fn decrement(&self) -> bool {
        self.0.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Kernel object reachable through handles.
pub trait Dispatcher: Send + Sync + 'static {
    /// Identifier of this object.
    fn koid(&self) -> Koid;

    /// Identifier of a paired object, if any.
    fn related_koid(&self) -> Koid {
        Koid::INVALID
    }

    /// Counter tracking open handles to this object.
    fn handle_count(&self) -> &HandleCount;

    /// Invoked once when the last handle to the object is closed.
    fn on_zero_handles(&self) {}

    /// Records the process now holding handles to this object.
    fn set_owner(&self, _owner: ProcessId) {}

    /// Upcast used by [`Handle::downcast`].
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Owned capability: a reference to a kernel object plus the rights it conveys.
pub struct Handle {
    object: Arc<dyn Dispatcher>,
    rights: Rights,
}

impl Handle {
    pub(crate) fn make(object: Arc<dyn Dispatcher>, rights: Rights) -> Self {
        object.handle_count().increment();
        Self { object, rights }
    }

    /// Rights conveyed by this handle.
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Identifier of the referenced object.
    pub fn koid(&self) -> Koid {
        self.object.koid()
    }

    /// Returns `true` when the handle conveys every right in `required`.
    pub fn has_rights(&self, required: Rights) -> bool {
        self.rights.contains(required)
    }

    /// The referenced kernel object.
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.object
    }

    /// Returns the referenced object as `T` when it is one.
    pub fn downcast<T: Dispatcher>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).into_any().downcast::<T>().ok()
    }

    /// Creates a second handle to the same object with `rights`.
    ///
    /// Requires [`Rights::DUPLICATE`]; `rights` must be a subset of this handle's rights.
    pub fn duplicate(&self, rights: Rights) -> Result<Handle> {
        if !self.rights.contains(Rights::DUPLICATE) || !self.rights.contains(rights) {
            return Err(Status::AccessDenied);
        }
        Ok(Self::make(Arc::clone(&self.object), rights))
    }

    /// Consumes the handle, returning one with `rights` (which must be a subset).
    pub fn replace(self, rights: Rights) -> Result<Handle> {
        if !self.rights.contains(rights) {
            return Err(Status::AccessDenied);
        }
        Ok(Self::make(Arc::clone(&self.object), rights))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.object.handle_count().decrement() {
            self.object.on_zero_handles();
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("koid", &self.object.koid())
            .field("rights", &self.rights.bits())
            .finish()
    }
}
